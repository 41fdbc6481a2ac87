pub mod image;
pub mod pipeline;
pub mod task_definition;
