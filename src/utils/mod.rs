pub mod env;
pub mod paths;
#[cfg(test)]
pub mod test_utils;
