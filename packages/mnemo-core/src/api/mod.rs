//! Public engine API.

pub mod engine;

pub use engine::{
    EngineMode, FindOptions, MemoryEngine, MemoryEngineBuilder, PutOptions, DEFAULT_COLLECTION,
    DEFAULT_DECAY_HALF_LIFE_DAYS,
};
