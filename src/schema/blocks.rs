//! Block operations: layout sections inside a module.

use chrono::Utc;
use sled::transaction::ConflictableTransactionResult;

use crate::error::{CoreError, CoreResult};
use crate::schema::registry::{required_name, SchemaRegistry};
use crate::schema::types::{Block, BlockUpdate, Field, NewBlock};
use crate::storage::{id_key, tx_put};

impl SchemaRegistry {
    pub fn create_block(&self, input: NewBlock) -> CoreResult<Block> {
        self.get_module(input.module_id)?;
        let name = required_name("block name", &input.name)?;
        let now = Utc::now();
        let block = Block {
            id: self.storage.next_id()?,
            module_id: input.module_id,
            name,
            block_type: input.block_type,
            settings: input.settings,
            display_order: input.display_order,
            created_at: now,
            updated_at: now,
        };
        self.storage
            .put(&self.storage.blocks, &id_key(block.id), &block)?;
        Ok(block)
    }

    pub fn get_block(&self, block_id: u64) -> CoreResult<Block> {
        self.storage
            .get(&self.storage.blocks, &id_key(block_id))?
            .ok_or_else(|| CoreError::not_found("block", block_id))
    }

    /// A module's blocks ordered by `display_order`, then id.
    pub fn blocks_for_module(&self, module_id: u64) -> CoreResult<Vec<Block>> {
        let mut blocks: Vec<Block> = self.storage.list(&self.storage.blocks)?;
        blocks.retain(|b| b.module_id == module_id);
        blocks.sort_by_key(|b| (b.display_order, b.id));
        Ok(blocks)
    }

    pub fn update_block(&self, block_id: u64, update: BlockUpdate) -> CoreResult<Block> {
        let mut block = self.get_block(block_id)?;
        if let Some(name) = update.name {
            block.name = required_name("block name", &name)?;
        }
        if let Some(block_type) = update.block_type {
            block.block_type = block_type;
        }
        if let Some(settings) = update.settings {
            block.settings = settings;
        }
        if let Some(display_order) = update.display_order {
            block.display_order = display_order;
        }
        block.updated_at = Utc::now();
        self.storage
            .put(&self.storage.blocks, &id_key(block.id), &block)?;
        Ok(block)
    }

    /// Removes a block and detaches its fields; the fields themselves
    /// survive with `block_id = None`.
    pub fn delete_block(&self, block_id: u64) -> CoreResult<()> {
        let block = self.get_block(block_id)?;
        let fields: Vec<Field> = self.storage.list(&self.storage.fields)?;
        for mut field in fields {
            if field.block_id == Some(block_id) {
                field.block_id = None;
                field.updated_at = Utc::now();
                self.storage
                    .put(&self.storage.fields, &id_key(field.id), &field)?;
            }
        }
        self.storage.remove(&self.storage.blocks, &id_key(block.id))?;
        Ok(())
    }

    /// Rewrites `display_order` so blocks appear in the given sequence.
    /// Every id must exist and belong to the module; nothing is written
    /// otherwise, and the writes land in one transaction.
    pub fn reorder_blocks(&self, module_id: u64, ordered_ids: &[u64]) -> CoreResult<()> {
        self.get_module(module_id)?;
        let mut blocks = Vec::with_capacity(ordered_ids.len());
        for &block_id in ordered_ids {
            let block = self.get_block(block_id)?;
            if block.module_id != module_id {
                return Err(CoreError::validation(format!(
                    "block {} does not belong to module {}",
                    block_id, module_id
                )));
            }
            blocks.push(block);
        }
        let now = Utc::now();
        for (position, block) in blocks.iter_mut().enumerate() {
            block.display_order = position as u32;
            block.updated_at = now;
        }
        self.storage
            .blocks
            .transaction(|tree| -> ConflictableTransactionResult<(), CoreError> {
                for block in &blocks {
                    tx_put(tree, &id_key(block.id), block)?;
                }
                Ok(())
            })?;
        self.storage.blocks.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{BlockType, NewModule};
    use crate::storage::Storage;
    use std::sync::Arc;

    fn registry_with_module() -> (SchemaRegistry, u64) {
        let registry = SchemaRegistry::new(Arc::new(Storage::open_temporary().unwrap()));
        let module = registry
            .create_module(NewModule {
                name: "Contacts".to_string(),
                singular_name: "Contact".to_string(),
                ..NewModule::default()
            })
            .unwrap();
        (registry, module.id)
    }

    #[test]
    fn test_block_lifecycle() {
        let (registry, module_id) = registry_with_module();
        let block = registry
            .create_block(NewBlock::new(module_id, "Details"))
            .unwrap();
        assert_eq!(block.block_type, BlockType::Section);

        let updated = registry
            .update_block(
                block.id,
                BlockUpdate {
                    name: Some("Overview".to_string()),
                    block_type: Some(BlockType::Panel),
                    ..BlockUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Overview");
        assert_eq!(updated.block_type, BlockType::Panel);

        registry.delete_block(block.id).unwrap();
        assert!(registry.get_block(block.id).is_err());
    }

    #[test]
    fn test_reorder_blocks_is_validated() {
        let (registry, module_id) = registry_with_module();
        let a = registry.create_block(NewBlock::new(module_id, "A")).unwrap();
        let b = registry.create_block(NewBlock::new(module_id, "B")).unwrap();

        registry.reorder_blocks(module_id, &[b.id, a.id]).unwrap();
        let ordered = registry.blocks_for_module(module_id).unwrap();
        assert_eq!(
            ordered.iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![b.id, a.id]
        );

        // Foreign or unknown ids reject the whole reorder.
        assert!(registry.reorder_blocks(module_id, &[a.id, 9999]).is_err());
        let unchanged = registry.blocks_for_module(module_id).unwrap();
        assert_eq!(
            unchanged.iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![b.id, a.id]
        );
    }
}
