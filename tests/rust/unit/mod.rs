//! Unit tests - Front end and model loading, no expansion involved

mod model_loading_tests;
mod parser_robustness_tests;
