//! Duplicate rule management.

use chrono::Utc;

use crate::dedup::types::{DuplicateRule, DuplicateRuleUpdate, NewDuplicateRule, RuleCondition};
use crate::dedup::DuplicateEngine;
use crate::error::{CoreError, CoreResult};
use crate::schema::registry::required_name;
use crate::storage::id_key;

impl DuplicateEngine {
    /// Creates an active rule. Its condition fields must be declared on
    /// the module and its weights must be positive.
    pub fn create_rule(&self, input: NewDuplicateRule) -> CoreResult<DuplicateRule> {
        let module = self.schema.get_module(input.module_id)?;
        let name = required_name("rule name", &input.name)?;
        self.validate_conditions(input.module_id, &module.api_name, &input.conditions)?;

        let now = Utc::now();
        let rule = DuplicateRule {
            id: self.storage.next_id()?,
            module_id: input.module_id,
            name,
            is_active: true,
            action: input.action,
            conditions: input.conditions,
            priority: input.priority,
            created_by: input.created_by,
            created_at: now,
            updated_at: now,
        };
        self.storage
            .put(&self.storage.duplicate_rules, &id_key(rule.id), &rule)?;
        log::info!(
            "created duplicate rule '{}' on module '{}'",
            rule.name,
            module.api_name
        );
        Ok(rule)
    }

    pub fn get_rule(&self, rule_id: u64) -> CoreResult<DuplicateRule> {
        self.storage
            .get(&self.storage.duplicate_rules, &id_key(rule_id))?
            .ok_or_else(|| CoreError::not_found("duplicate rule", rule_id))
    }

    /// A module's rules in evaluation order: ascending priority, then id.
    pub fn list_rules(&self, module_id: u64) -> CoreResult<Vec<DuplicateRule>> {
        let mut rules: Vec<DuplicateRule> = self.storage.list(&self.storage.duplicate_rules)?;
        rules.retain(|r| r.module_id == module_id);
        rules.sort_by_key(|r| (r.priority, r.id));
        Ok(rules)
    }

    pub(crate) fn active_rules(&self, module_id: u64) -> CoreResult<Vec<DuplicateRule>> {
        let mut rules = self.list_rules(module_id)?;
        rules.retain(|r| r.is_active);
        Ok(rules)
    }

    pub fn update_rule(
        &self,
        rule_id: u64,
        update: DuplicateRuleUpdate,
    ) -> CoreResult<DuplicateRule> {
        let mut rule = self.get_rule(rule_id)?;
        if let Some(name) = update.name {
            rule.name = required_name("rule name", &name)?;
        }
        if let Some(action) = update.action {
            rule.action = action;
        }
        if let Some(conditions) = update.conditions {
            let module = self.schema.get_module(rule.module_id)?;
            self.validate_conditions(rule.module_id, &module.api_name, &conditions)?;
            rule.conditions = conditions;
        }
        if let Some(priority) = update.priority {
            rule.priority = priority;
        }
        if let Some(is_active) = update.is_active {
            rule.is_active = is_active;
        }
        rule.updated_at = Utc::now();
        self.storage
            .put(&self.storage.duplicate_rules, &id_key(rule.id), &rule)?;
        Ok(rule)
    }

    pub fn delete_rule(&self, rule_id: u64) -> CoreResult<()> {
        self.get_rule(rule_id)?;
        self.storage
            .remove(&self.storage.duplicate_rules, &id_key(rule_id))?;
        Ok(())
    }

    pub fn toggle_rule_active(&self, rule_id: u64) -> CoreResult<DuplicateRule> {
        let mut rule = self.get_rule(rule_id)?;
        rule.is_active = !rule.is_active;
        rule.updated_at = Utc::now();
        self.storage
            .put(&self.storage.duplicate_rules, &id_key(rule.id), &rule)?;
        Ok(rule)
    }

    fn validate_conditions(
        &self,
        module_id: u64,
        module_api_name: &str,
        conditions: &[RuleCondition],
    ) -> CoreResult<()> {
        if conditions.is_empty() {
            return Err(CoreError::validation(
                "a duplicate rule needs at least one condition",
            ));
        }
        let fields = self.schema.fields_for_module(module_id)?;
        for condition in conditions {
            if !condition.weight.is_finite() || condition.weight <= 0.0 {
                return Err(CoreError::validation(format!(
                    "condition weight for '{}' must be a positive number",
                    condition.field
                )));
            }
            if !fields.iter().any(|f| f.api_name == condition.field) {
                return Err(CoreError::validation(format!(
                    "condition field '{}' is not declared on module '{}'",
                    condition.field, module_api_name
                )));
            }
        }
        Ok(())
    }
}
