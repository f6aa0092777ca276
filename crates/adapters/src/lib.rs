pub mod csv_reader;
pub mod export;
pub mod memory;

#[must_use]
pub fn adapter_name() -> &'static str {
    "gridline-adapters"
}

#[cfg(test)]
mod tests {
    use super::adapter_name;

    #[test]
    fn adapter_name_is_stable() {
        assert_eq!(adapter_name(), "gridline-adapters");
    }
}
