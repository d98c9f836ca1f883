pub mod config;
pub mod document;
pub mod error;
pub mod link_parser;
pub mod mapping;
pub mod relinker;
pub mod store;
pub mod types;
pub mod xml_path;

pub use config::LinkConfig;
pub use error::{RelinkError, Result};
pub use mapping::{MappingResolver, MappingTable, MissPolicy};
pub use relinker::{RelinkOptions, RelinkReport, Relinker};
pub use store::{DocumentStore, MemoryStore, RowStore};
pub use types::{EntityType, FieldValue, Identifier, Row};
