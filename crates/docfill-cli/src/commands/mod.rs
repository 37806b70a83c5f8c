pub mod extract;
pub mod fill;
pub mod presets;
