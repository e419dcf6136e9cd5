fn main() -> anyhow::Result<()> {
    phrasecards::cli::run()
}
