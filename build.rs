// build.rs

fn main() -> anyhow::Result<()> {
    build_data::set_SOURCE_TIMESTAMP().map_err(anyhow::Error::msg)?;
    build_data::no_debug_rebuilds();

    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
    Ok(())
}
// EOF
