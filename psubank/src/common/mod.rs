pub(crate) mod phys;
