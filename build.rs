fn main() {
    // Host test builds run with `--no-default-features`; only the device
    // build needs the ESP-IDF environment exported.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
