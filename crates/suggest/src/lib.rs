pub mod suggest;
pub mod top_k;

pub use suggest::TagSuggester;
pub use top_k::TopK;
