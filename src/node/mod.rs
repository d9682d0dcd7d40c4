mod weak_node;

pub use weak_node::*;
