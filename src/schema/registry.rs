//! Schema registry service.
//!
//! `SchemaRegistry` owns every module, block, field, and field option
//! definition. The impl is split by concern: this file carries the module
//! operations and the shared naming helpers; `blocks.rs`, `fields.rs`, and
//! `dependencies.rs` extend the same struct.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::schema::types::{Module, ModuleUpdate, NewModule};
use crate::storage::{id_key, Storage};

/// Machine identifiers: lowercase snake, starting with a letter.
static API_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("api name pattern compiles"));

/// Length cap shared by display names and api names.
pub(crate) const NAME_MAX: usize = 100;

/// Service over schema definitions. Cheap to clone; all state lives in
/// storage.
#[derive(Clone)]
pub struct SchemaRegistry {
    pub(crate) storage: Arc<Storage>,
}

impl SchemaRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    // ========== MODULE OPERATIONS ==========

    /// Creates a module. The api name is derived from `name` when omitted
    /// and must be unique across all modules, soft-deleted ones included.
    pub fn create_module(&self, input: NewModule) -> CoreResult<Module> {
        let name = required_name("module name", &input.name)?;
        let singular_name = required_name("module singular name", &input.singular_name)?;
        let api_name = match input.api_name {
            Some(explicit) => explicit,
            None => derive_api_name(&name),
        };
        validate_api_name(&api_name)?;
        self.assert_module_api_name_free(&api_name, None)?;

        let now = Utc::now();
        let module = Module {
            id: self.storage.next_id()?,
            name,
            singular_name,
            api_name,
            icon: input.icon,
            description: input.description,
            is_active: true,
            settings: input.settings,
            display_order: input.display_order,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.storage
            .put(&self.storage.modules, &id_key(module.id), &module)?;
        log::info!("created module '{}' (id {})", module.api_name, module.id);
        Ok(module)
    }

    /// Fetches a live (not soft-deleted) module.
    pub fn get_module(&self, module_id: u64) -> CoreResult<Module> {
        match self.load_module(module_id)? {
            Some(module) if !module.is_deleted() => Ok(module),
            _ => Err(CoreError::not_found("module", module_id)),
        }
    }

    pub fn get_module_by_api_name(&self, api_name: &str) -> CoreResult<Module> {
        let modules: Vec<Module> = self.storage.list(&self.storage.modules)?;
        modules
            .into_iter()
            .find(|m| m.api_name == api_name && !m.is_deleted())
            .ok_or_else(|| CoreError::not_found("module", api_name))
    }

    /// Active, live modules ordered by `display_order`, then id.
    pub fn list_modules(&self) -> CoreResult<Vec<Module>> {
        let mut modules: Vec<Module> = self.storage.list(&self.storage.modules)?;
        modules.retain(|m| m.is_active && !m.is_deleted());
        modules.sort_by_key(|m| (m.display_order, m.id));
        Ok(modules)
    }

    /// Every module row, inactive and soft-deleted ones included.
    pub fn list_all_modules(&self) -> CoreResult<Vec<Module>> {
        let mut modules: Vec<Module> = self.storage.list(&self.storage.modules)?;
        modules.sort_by_key(|m| (m.display_order, m.id));
        Ok(modules)
    }

    /// Updates display properties. The api name is immutable: the update
    /// may resubmit the stored value but not change it.
    pub fn update_module(&self, module_id: u64, update: ModuleUpdate) -> CoreResult<Module> {
        let mut module = self.get_module(module_id)?;
        if let Some(api_name) = &update.api_name {
            if api_name != &module.api_name {
                return Err(CoreError::validation(format!(
                    "module api name is immutable ('{}' cannot become '{}')",
                    module.api_name, api_name
                )));
            }
        }
        if let Some(name) = update.name {
            module.name = required_name("module name", &name)?;
        }
        if let Some(singular_name) = update.singular_name {
            module.singular_name = required_name("module singular name", &singular_name)?;
        }
        if let Some(icon) = update.icon {
            module.icon = Some(icon);
        }
        if let Some(description) = update.description {
            module.description = Some(description);
        }
        if let Some(settings) = update.settings {
            module.settings = settings;
        }
        if let Some(display_order) = update.display_order {
            module.display_order = display_order;
        }
        if let Some(is_active) = update.is_active {
            module.is_active = is_active;
        }
        module.updated_at = Utc::now();
        self.storage
            .put(&self.storage.modules, &id_key(module.id), &module)?;
        Ok(module)
    }

    pub fn toggle_module_active(&self, module_id: u64) -> CoreResult<Module> {
        let mut module = self.get_module(module_id)?;
        module.is_active = !module.is_active;
        module.updated_at = Utc::now();
        self.storage
            .put(&self.storage.modules, &id_key(module.id), &module)?;
        log::info!(
            "module '{}' is now {}",
            module.api_name,
            if module.is_active { "active" } else { "inactive" }
        );
        Ok(module)
    }

    /// Soft delete. The module disappears from default listings and stops
    /// accepting record writes; its records and schema rows stay put.
    pub fn delete_module(&self, module_id: u64) -> CoreResult<()> {
        let mut module = self.get_module(module_id)?;
        let now = Utc::now();
        module.deleted_at = Some(now);
        module.updated_at = now;
        self.storage
            .put(&self.storage.modules, &id_key(module.id), &module)?;
        log::info!("soft deleted module '{}'", module.api_name);
        Ok(())
    }

    /// Clears a soft delete. Restoring a module that was never deleted is
    /// a no-op.
    pub fn restore_module(&self, module_id: u64) -> CoreResult<Module> {
        let mut module = match self.load_module(module_id)? {
            Some(module) => module,
            None => return Err(CoreError::not_found("module", module_id)),
        };
        if module.is_deleted() {
            module.deleted_at = None;
            module.updated_at = Utc::now();
            self.storage
                .put(&self.storage.modules, &id_key(module.id), &module)?;
            log::info!("restored module '{}'", module.api_name);
        }
        Ok(module)
    }

    /// Hard delete: removes the module row and cascades to its blocks,
    /// fields, and field options. Records are never cascaded.
    pub fn purge_module(&self, module_id: u64) -> CoreResult<()> {
        let module = match self.load_module(module_id)? {
            Some(module) => module,
            None => return Err(CoreError::not_found("module", module_id)),
        };
        for field in self.fields_for_module(module_id)? {
            for option in self.options_for_field(field.id)? {
                self.storage
                    .remove(&self.storage.field_options, &id_key(option.id))?;
            }
            self.storage.remove(&self.storage.fields, &id_key(field.id))?;
        }
        for block in self.blocks_for_module(module_id)? {
            self.storage.remove(&self.storage.blocks, &id_key(block.id))?;
        }
        self.storage.remove(&self.storage.modules, &id_key(module_id))?;
        log::info!("purged module '{}' and its schema rows", module.api_name);
        Ok(())
    }

    fn load_module(&self, module_id: u64) -> CoreResult<Option<Module>> {
        self.storage.get(&self.storage.modules, &id_key(module_id))
    }

    fn assert_module_api_name_free(&self, api_name: &str, exclude: Option<u64>) -> CoreResult<()> {
        let modules: Vec<Module> = self.storage.list(&self.storage.modules)?;
        if modules
            .iter()
            .any(|m| m.api_name == api_name && Some(m.id) != exclude)
        {
            return Err(CoreError::conflict(format!(
                "module api name '{}' is already taken",
                api_name
            )));
        }
        Ok(())
    }
}

// ========== NAMING HELPERS ==========

pub(crate) fn validate_api_name(api_name: &str) -> CoreResult<()> {
    if api_name.len() > NAME_MAX {
        return Err(CoreError::validation(format!(
            "api name must be at most {} characters",
            NAME_MAX
        )));
    }
    if !API_NAME_RE.is_match(api_name) {
        return Err(CoreError::validation(format!(
            "api name '{}' must match {}",
            api_name,
            API_NAME_RE.as_str()
        )));
    }
    Ok(())
}

/// Snake-cases a display label into an api name candidate. The result
/// still goes through `validate_api_name`, so a label that yields nothing
/// usable (say, all punctuation) is rejected rather than guessed at.
pub(crate) fn derive_api_name(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut prev_lower = false;
    for c in label.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() {
                if prev_lower {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
                prev_lower = false;
            } else {
                out.push(c);
                prev_lower = true;
            }
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

pub(crate) fn required_name(what: &str, value: &str) -> CoreResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation(format!("{} must not be empty", what)));
    }
    if trimmed.chars().count() > NAME_MAX {
        return Err(CoreError::validation(format!(
            "{} must be at most {} characters",
            what, NAME_MAX
        )));
    }
    Ok(trimmed.to_string())
}
