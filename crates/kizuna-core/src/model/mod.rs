//! Neural model definitions for head attachment and label classification.

pub mod head;
pub mod joint;
pub mod label;
pub mod layers;

pub use head::{HeadModel, HeadModelParams};
pub use joint::{JointModel, JointModelParams};
pub use label::{LabelModel, LabelModelParams};
