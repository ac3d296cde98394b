//! sea-orm entities for the relational store. The same models are the record types shared by
//! every `EntityStore` backend.

pub mod order;
pub mod order_item;
pub mod product;
pub mod settings;
pub mod supplier;
pub mod unit;

pub use order::OrderStatus;
pub use unit::Unit;

pub type Supplier = supplier::Model;
pub type Product = product::Model;
pub type Order = order::Model;
pub type OrderItem = order_item::Model;
pub type Settings = settings::Model;
