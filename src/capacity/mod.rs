// Symbol capacity model and transfer planning

pub mod table;
pub mod planner;

pub use table::{capacity, modules, symbol_pixel_size};
pub use planner::{
    adjust_chunk_size, bandwidth_efficiency, choose_config, estimate_compressed_size,
    estimate_transmission_time, max_chunk_for, max_chunk_size, suggested_plans,
    symbol_bytes_needed, version_for_chunk, CapacityPlan, PlanConstraints, DEFAULT_MAX_PIXELS,
};
