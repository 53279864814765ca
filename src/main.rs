fn main() -> anyhow::Result<()> {
    braindump::cli::run()
}
