pub mod order;
pub mod order_line_item;
pub mod product;
