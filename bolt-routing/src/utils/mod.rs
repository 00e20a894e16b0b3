pub(crate) mod round_robin;
