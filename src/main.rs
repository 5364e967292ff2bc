#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = question_paper::run().await {
        eprintln!("question-paper fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
