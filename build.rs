fn main() {
    // ESP-IDF builds need the sysenv passthrough for linker args and
    // component paths. Host builds (simulation, tests) skip it.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
