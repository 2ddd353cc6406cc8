pub mod arena;
pub mod combat;
pub mod hitscan;
