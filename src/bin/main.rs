use portfolio_insights_assistant::{
    bootstrap::AssistantContext,
    config::AssistantConfig,
    memory::Transcript,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const BANNER: &str = "\
📊 Business Insights Assistant

Ask about:
- Property details (amenities, location features, nearby services)
- Sales and agent performance (most sold cities, pricing, purchase dates)
- Customer and agent feedback (what clients say about properties or agents)

Commands: /new starts a new conversation, /quit exits.
";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = AssistantConfig::from_env()?;
    let max_history_turns = config.max_history_turns;
    let context = AssistantContext::bootstrap(config).await?;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut transcript = Transcript::new();

    stdout.write_all(BANNER.as_bytes()).await?;

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();

        match question {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                transcript.clear();
                info!("[Session] Chat history reset by user.");
                stdout.write_all(b"Started a new conversation.\n").await?;
                continue;
            }
            _ => {}
        }

        info!("[User Question] {}", question);
        let history = transcript.recent(max_history_turns);
        let answer = context.assistant.handle_turn(question, &history).await;
        info!("[Answer] {}", answer);

        stdout.write_all(format!("\n{}\n", answer).as_bytes()).await?;
        transcript.push(question, answer);
    }

    Ok(())
}
