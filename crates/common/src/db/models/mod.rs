//! SeaORM entity models
//!
//! Database entities for the enrichment pipeline

mod food;
mod queue_entry;

pub use food::{
    Entity as FoodEntity,
    Model as FoodRecord,
    ActiveModel as FoodActiveModel,
    Column as FoodColumn,
    EnrichmentStatus,
    NewFood,
};

pub use queue_entry::{
    Entity as QueueEntryEntity,
    Model as QueueEntry,
    ActiveModel as QueueEntryActiveModel,
    Column as QueueEntryColumn,
    QueueStatus,
};
