//! Schema registry: modules, blocks, fields, field options, and the
//! visibility dependency resolver.

mod blocks;
mod dependencies;
mod fields;
pub mod registry;
pub mod types;

pub use registry::SchemaRegistry;
pub use types::{
    Block, BlockType, BlockUpdate, Field, FieldOption, FieldOptionUpdate, FieldType, FieldUpdate,
    Module, ModuleUpdate, NewBlock, NewField, NewFieldOption, NewModule, ValidationRule,
    VisibilityExpression, VisibilityLogic, VisibilityOperator, VisibilityRule,
};
