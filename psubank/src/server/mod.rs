pub(crate) mod handler;
pub(crate) mod table;
