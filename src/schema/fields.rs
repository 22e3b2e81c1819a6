//! Field and field option operations.

use chrono::Utc;
use regex::Regex;
use sled::transaction::ConflictableTransactionResult;

use crate::error::{CoreError, CoreResult};
use crate::record::FieldValue;
use crate::schema::registry::{derive_api_name, required_name, validate_api_name, SchemaRegistry};
use crate::schema::types::{
    Field, FieldOption, FieldOptionUpdate, FieldType, FieldUpdate, NewField, NewFieldOption,
    ValidationRule,
};
use crate::storage::{id_key, tx_put};

impl SchemaRegistry {
    /// Creates a field on a live module. Select fields are created
    /// together with their options; the api name must be unique within
    /// the module.
    pub fn create_field(&self, input: NewField) -> CoreResult<Field> {
        let module = self.get_module(input.module_id)?;
        if let Some(block_id) = input.block_id {
            self.assert_block_in_module(block_id, input.module_id)?;
        }
        let label = required_name("field label", &input.label)?;
        let api_name = match input.api_name {
            Some(explicit) => explicit,
            None => derive_api_name(&label),
        };
        validate_api_name(&api_name)?;

        let siblings = self.fields_for_module(input.module_id)?;
        if siblings.iter().any(|f| f.api_name == api_name) {
            return Err(CoreError::conflict(format!(
                "field api name '{}' is already taken in module '{}'",
                api_name, module.api_name
            )));
        }
        if input.field_type.uses_options() {
            if input.options.is_empty() {
                return Err(CoreError::validation(
                    "select and multi_select fields need at least one option",
                ));
            }
        } else if !input.options.is_empty() {
            return Err(CoreError::validation(
                "only select and multi_select fields carry options",
            ));
        }
        assert_width(input.width)?;
        assert_rules_compile(&input.validation_rules)?;
        assert_default_fits(input.field_type, &input.default_value)?;
        if let Some(expression) = &input.visibility {
            self.assert_visibility_valid(&siblings, &api_name, expression)?;
        }

        let now = Utc::now();
        let field = Field {
            id: self.storage.next_id()?,
            module_id: input.module_id,
            block_id: input.block_id,
            label,
            api_name,
            field_type: input.field_type,
            description: input.description,
            help_text: input.help_text,
            is_required: input.is_required,
            is_unique: input.is_unique,
            is_searchable: input.is_searchable,
            is_filterable: input.is_filterable,
            is_sortable: input.is_sortable,
            validation_rules: input.validation_rules,
            settings: input.settings,
            default_value: input.default_value,
            visibility: input.visibility,
            display_order: input.display_order,
            width: input.width,
            created_at: now,
            updated_at: now,
        };
        self.storage
            .put(&self.storage.fields, &id_key(field.id), &field)?;
        for option in input.options {
            self.insert_option(field.id, option)?;
        }
        log::info!(
            "created field '{}' on module '{}'",
            field.api_name,
            module.api_name
        );
        Ok(field)
    }

    pub fn get_field(&self, field_id: u64) -> CoreResult<Field> {
        self.storage
            .get(&self.storage.fields, &id_key(field_id))?
            .ok_or_else(|| CoreError::not_found("field", field_id))
    }

    pub fn get_field_by_api_name(&self, module_id: u64, api_name: &str) -> CoreResult<Field> {
        self.fields_for_module(module_id)?
            .into_iter()
            .find(|f| f.api_name == api_name)
            .ok_or_else(|| CoreError::not_found("field", api_name))
    }

    /// A module's fields ordered by `display_order`, then id.
    pub fn fields_for_module(&self, module_id: u64) -> CoreResult<Vec<Field>> {
        let mut fields: Vec<Field> = self.storage.list(&self.storage.fields)?;
        fields.retain(|f| f.module_id == module_id);
        fields.sort_by_key(|f| (f.display_order, f.id));
        Ok(fields)
    }

    pub fn update_field(&self, field_id: u64, update: FieldUpdate) -> CoreResult<Field> {
        let mut field = self.get_field(field_id)?;
        self.get_module(field.module_id)?;

        if let Some(label) = update.label {
            field.label = required_name("field label", &label)?;
        }
        if let Some(api_name) = update.api_name {
            if api_name != field.api_name {
                validate_api_name(&api_name)?;
                let siblings = self.fields_for_module(field.module_id)?;
                if siblings
                    .iter()
                    .any(|f| f.id != field.id && f.api_name == api_name)
                {
                    return Err(CoreError::conflict(format!(
                        "field api name '{}' is already taken in module {}",
                        api_name, field.module_id
                    )));
                }
                // Sibling expressions store api names; renaming out from
                // under them would dangle their references.
                self.assert_not_referenced(&field)?;
                field.api_name = api_name;
            }
        }
        if let Some(block_id) = update.block_id {
            if let Some(block_id) = block_id {
                self.assert_block_in_module(block_id, field.module_id)?;
            }
            field.block_id = block_id;
        }
        if let Some(field_type) = update.field_type {
            if field_type != field.field_type {
                if field_type.uses_options() && self.options_for_field(field.id)?.is_empty() {
                    return Err(CoreError::validation(
                        "cannot switch to a select type without options",
                    ));
                }
                field.field_type = field_type;
            }
        }
        if let Some(description) = update.description {
            field.description = Some(description);
        }
        if let Some(help_text) = update.help_text {
            field.help_text = Some(help_text);
        }
        if let Some(is_required) = update.is_required {
            field.is_required = is_required;
        }
        if let Some(is_unique) = update.is_unique {
            field.is_unique = is_unique;
        }
        if let Some(is_searchable) = update.is_searchable {
            field.is_searchable = is_searchable;
        }
        if let Some(is_filterable) = update.is_filterable {
            field.is_filterable = is_filterable;
        }
        if let Some(is_sortable) = update.is_sortable {
            field.is_sortable = is_sortable;
        }
        if let Some(rules) = update.validation_rules {
            assert_rules_compile(&rules)?;
            field.validation_rules = rules;
        }
        if let Some(settings) = update.settings {
            field.settings = settings;
        }
        if let Some(default_value) = update.default_value {
            field.default_value = default_value;
        }
        assert_default_fits(field.field_type, &field.default_value)?;
        if let Some(visibility) = update.visibility {
            field.visibility = visibility;
        }
        if let Some(expression) = &field.visibility {
            // Re-validated on every save; the expression, the api name, or
            // a sibling may have changed since it was written.
            let siblings: Vec<Field> = self
                .fields_for_module(field.module_id)?
                .into_iter()
                .filter(|f| f.id != field.id)
                .collect();
            self.assert_visibility_valid(&siblings, &field.api_name, expression)?;
        }
        if let Some(display_order) = update.display_order {
            field.display_order = display_order;
        }
        if let Some(width) = update.width {
            assert_width(width)?;
            field.width = width;
        }
        field.updated_at = Utc::now();
        self.storage
            .put(&self.storage.fields, &id_key(field.id), &field)?;
        Ok(field)
    }

    /// Removes a field and its options. Rejected while sibling visibility
    /// expressions still reference the field.
    pub fn delete_field(&self, field_id: u64) -> CoreResult<()> {
        let field = self.get_field(field_id)?;
        self.assert_not_referenced(&field)?;
        for option in self.options_for_field(field_id)? {
            self.storage
                .remove(&self.storage.field_options, &id_key(option.id))?;
        }
        self.storage.remove(&self.storage.fields, &id_key(field_id))?;
        log::info!("deleted field '{}'", field.api_name);
        Ok(())
    }

    /// Rewrites `display_order` so fields appear in the given sequence,
    /// all writes in one transaction.
    pub fn reorder_fields(&self, module_id: u64, ordered_ids: &[u64]) -> CoreResult<()> {
        self.get_module(module_id)?;
        let mut fields = Vec::with_capacity(ordered_ids.len());
        for &field_id in ordered_ids {
            let field = self.get_field(field_id)?;
            if field.module_id != module_id {
                return Err(CoreError::validation(format!(
                    "field {} does not belong to module {}",
                    field_id, module_id
                )));
            }
            fields.push(field);
        }
        let now = Utc::now();
        for (position, field) in fields.iter_mut().enumerate() {
            field.display_order = position as u32;
            field.updated_at = now;
        }
        self.storage
            .fields
            .transaction(|tree| -> ConflictableTransactionResult<(), CoreError> {
                for field in &fields {
                    tx_put(tree, &id_key(field.id), field)?;
                }
                Ok(())
            })?;
        self.storage.fields.flush()?;
        Ok(())
    }

    // ========== FIELD OPTIONS ==========

    pub fn create_field_option(
        &self,
        field_id: u64,
        input: NewFieldOption,
    ) -> CoreResult<FieldOption> {
        let field = self.get_field(field_id)?;
        if !field.field_type.uses_options() {
            return Err(CoreError::validation(format!(
                "field '{}' does not take options",
                field.api_name
            )));
        }
        self.insert_option(field_id, input)
    }

    pub fn get_field_option(&self, option_id: u64) -> CoreResult<FieldOption> {
        self.storage
            .get(&self.storage.field_options, &id_key(option_id))?
            .ok_or_else(|| CoreError::not_found("field option", option_id))
    }

    pub fn update_field_option(
        &self,
        option_id: u64,
        update: FieldOptionUpdate,
    ) -> CoreResult<FieldOption> {
        let mut option = self.get_field_option(option_id)?;
        if let Some(label) = update.label {
            option.label = required_name("option label", &label)?;
        }
        if let Some(value) = update.value {
            option.value = required_name("option value", &value)?;
        }
        if let Some(color) = update.color {
            option.color = color;
        }
        if let Some(is_active) = update.is_active {
            option.is_active = is_active;
        }
        if let Some(display_order) = update.display_order {
            option.display_order = display_order;
        }
        option.updated_at = Utc::now();
        self.storage
            .put(&self.storage.field_options, &id_key(option.id), &option)?;
        Ok(option)
    }

    /// Removes one option; the last option of a field cannot be removed.
    pub fn delete_field_option(&self, option_id: u64) -> CoreResult<()> {
        let option = self.get_field_option(option_id)?;
        if self.options_for_field(option.field_id)?.len() <= 1 {
            return Err(CoreError::validation(
                "a select field needs at least one option",
            ));
        }
        self.storage
            .remove(&self.storage.field_options, &id_key(option_id))?;
        Ok(())
    }

    /// A field's options ordered by `display_order`, then id. Inactive
    /// options are included; callers hide them where that matters.
    pub fn options_for_field(&self, field_id: u64) -> CoreResult<Vec<FieldOption>> {
        let mut options: Vec<FieldOption> = self.storage.list(&self.storage.field_options)?;
        options.retain(|o| o.field_id == field_id);
        options.sort_by_key(|o| (o.display_order, o.id));
        Ok(options)
    }

    fn insert_option(&self, field_id: u64, input: NewFieldOption) -> CoreResult<FieldOption> {
        let label = required_name("option label", &input.label)?;
        let value = match input.value {
            Some(value) => required_name("option value", &value)?,
            None => label.clone(),
        };
        let now = Utc::now();
        let option = FieldOption {
            id: self.storage.next_id()?,
            field_id,
            label,
            value,
            color: input.color,
            is_active: true,
            display_order: input.display_order,
            created_at: now,
            updated_at: now,
        };
        self.storage
            .put(&self.storage.field_options, &id_key(option.id), &option)?;
        Ok(option)
    }

    fn assert_block_in_module(&self, block_id: u64, module_id: u64) -> CoreResult<()> {
        let block = self.get_block(block_id)?;
        if block.module_id != module_id {
            return Err(CoreError::validation(format!(
                "block {} does not belong to module {}",
                block_id, module_id
            )));
        }
        Ok(())
    }

    fn assert_not_referenced(&self, field: &Field) -> CoreResult<()> {
        let dependents: Vec<String> = self
            .dependent_fields(field.module_id, &field.api_name)?
            .into_iter()
            .filter(|f| f.id != field.id)
            .map(|f| f.api_name)
            .collect();
        if !dependents.is_empty() {
            return Err(CoreError::validation(format!(
                "field '{}' is referenced by visibility rules of: {}",
                field.api_name,
                dependents.join(", ")
            )));
        }
        Ok(())
    }
}

fn assert_width(width: u8) -> CoreResult<()> {
    if width == 0 || width > 100 {
        return Err(CoreError::validation(
            "field width must be between 1 and 100",
        ));
    }
    Ok(())
}

fn assert_rules_compile(rules: &[ValidationRule]) -> CoreResult<()> {
    for rule in rules {
        if let ValidationRule::Pattern { value } = rule {
            if let Err(e) = Regex::new(value) {
                return Err(CoreError::validation(format!(
                    "pattern rule does not compile: {}",
                    e
                )));
            }
        }
    }
    Ok(())
}

fn assert_default_fits(field_type: FieldType, default_value: &Option<FieldValue>) -> CoreResult<()> {
    if let Some(value) = default_value {
        if !value.is_empty() {
            if let Err(reason) = field_type.check_value(value) {
                return Err(CoreError::validation(format!("default value: {}", reason)));
            }
        }
    }
    Ok(())
}
