//! Schema entity types: modules, blocks, fields, and field options.

pub mod block;
pub mod field;
pub mod field_option;
pub mod module;

pub use block::{Block, BlockType, BlockUpdate, NewBlock};
pub use field::{
    Field, FieldType, FieldUpdate, NewField, ValidationRule, VisibilityExpression,
    VisibilityLogic, VisibilityOperator, VisibilityRule,
};
pub use field_option::{FieldOption, FieldOptionUpdate, NewFieldOption};
pub use module::{Module, ModuleUpdate, NewModule};
