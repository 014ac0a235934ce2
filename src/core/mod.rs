// Core modules implementing row storage, indexing, and error modeling.
pub mod codec;
pub mod error;
pub mod hash_index;
pub mod index;
pub mod index_store;
pub mod layout;
pub mod ops;
pub mod ordered_index;
pub mod row_store;
pub mod schema;
pub mod value;
