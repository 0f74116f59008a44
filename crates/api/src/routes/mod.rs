pub mod destinations;
pub mod ops;
pub mod queue_items;
