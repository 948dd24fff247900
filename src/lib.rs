pub mod annotate;
pub mod capture;
pub mod config;
pub mod display;
pub mod pipeline;
pub mod yolo;
