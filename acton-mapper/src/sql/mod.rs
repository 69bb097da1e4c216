//! SQL synthesis, template caching and statement compilation

mod cache;
mod skeleton;
mod statement;
mod synthesizer;
mod template;

pub use cache::{TemplateCache, TemplateKey};
pub use statement::{Parameter, ParameterSet, Statement, MAX_PARAMETERS};
pub use synthesizer::{synthesize, OperationKind};
pub use template::{SqlTemplate, Token};

pub(crate) use synthesizer::{batch_parameter, key_set_parameter};
