pub mod audit_logs;
pub mod cart_items;
pub mod customers;
pub mod order_items;
pub mod orders;
pub mod payments;
pub mod products;
pub mod vouchers;

pub use audit_logs::Entity as AuditLogs;
pub use cart_items::Entity as CartItems;
pub use customers::Entity as Customers;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use payments::Entity as Payments;
pub use products::Entity as Products;
pub use vouchers::Entity as Vouchers;
