fn main() {
    // Only device builds carry the ESP-IDF environment; host builds run the core tests
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
