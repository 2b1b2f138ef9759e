mod char_rnn;
mod config;
mod loss;
mod lstm;

pub use char_rnn::CharRnn;
pub use config::ModelSpec;
pub use loss::{correct_predictions, next_symbol_loss};
pub use lstm::LstmLayer;
