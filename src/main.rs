use std::sync::Arc;

use anyhow::{Context, anyhow};

use warranty_desk::catalog::{Resolver, load_policy_index};
use warranty_desk::claim::Recommendation;
use warranty_desk::config::{AppConfig, SendMode};
use warranty_desk::dispatch::{Dispatcher, MailProvider, ManualProvider, SmtpProvider};
use warranty_desk::engine::DecisionEngine;
use warranty_desk::intake::{FileInbox, MailSource};
use warranty_desk::llm::create_reasoner;
use warranty_desk::pipeline::{Advance, Interrupt, Orchestrator, ResumeInput};
use warranty_desk::render::TextArtifacts;
use warranty_desk::retrieval::{HashEmbedder, PolicyIndex, Retriever};
use warranty_desk::store::{Database, LibSqlBackend};

const USAGE: &str = "\
warranty-desk <command>

Commands:
  intake                      Process new inbox messages up to the review interrupt
  list                        List in-flight claims and their next stage
  status <claim-id>           Show a claim's current state
  review <claim-id> <APPROVE|REJECT|NEED_INFO> [notes...]
                              Record the human decision and draft the response
  label <claim-id>            Generate the return label (APPROVE claims at the gate)
  send <claim-id>             Confirm dispatch and complete the claim
  stats                       Aggregate decision counts
";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprint!("{USAGE}");
        std::process::exit(2);
    };

    let config = AppConfig::from_env()?;

    // ── Collaborators ───────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
    let reasoner = create_reasoner(&config.reasoner, &config.company.name)?;

    let resolver = Arc::new(
        Resolver::load(
            &config.products_file,
            &config.policy_index_file,
            config.policies_dir.clone(),
        )
        .await,
    );

    let entries = load_policy_index(&config.policy_index_file).await;
    let index = Arc::new(PolicyIndex::new(
        config.policies_dir.clone(),
        entries,
        Arc::new(HashEmbedder::default()),
    ));
    let retriever = Arc::new(Retriever::new(index));

    let engine = DecisionEngine::new(
        Arc::clone(&reasoner),
        config.warranty_days,
        config.llm_timeout,
    );

    let artifacts = Arc::new(TextArtifacts::new(
        config.outbox_dir.clone(),
        config.company.clone(),
        resolver.return_address(),
    ));

    let provider: Arc<dyn MailProvider> = match config.send_mode {
        SendMode::Manual => Arc::new(ManualProvider),
        SendMode::Smtp => {
            let smtp = config
                .smtp
                .clone()
                .context("SMTP send mode requires SMTP configuration")?;
            Arc::new(SmtpProvider::new(smtp))
        }
    };
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&db),
        provider,
        config.sender_address.clone(),
    ));

    let orchestrator = Orchestrator::new(
        Arc::clone(&db),
        reasoner,
        resolver,
        retriever,
        engine,
        artifacts,
        dispatcher,
        config.llm_timeout,
    );

    // ── Commands ────────────────────────────────────────────────────
    match command {
        "intake" => {
            let inbox = FileInbox::new(config.inbox_dir.clone());
            let batch = inbox.fetch_all().await?;
            println!(
                "Fetched {} message(s) from {}",
                batch.messages.len(),
                config.inbox_dir.display()
            );
            if !batch.failures.is_empty() {
                println!("{} unreadable message(s) recorded", batch.failures.len());
            }
            let advanced = orchestrator.intake(batch).await?;
            for advance in &advanced {
                print_advance(advance);
            }
            if advanced.is_empty() {
                println!("Nothing new to process.");
            }
        }

        "list" => {
            let checkpoints = db.list_checkpoints().await?;
            if checkpoints.is_empty() {
                println!("No claims tracked.");
            }
            for (claim_id, next) in checkpoints {
                match next {
                    Some(stage) => println!("{claim_id}  next: {stage}"),
                    None => println!("{claim_id}  done"),
                }
            }
        }

        "status" => {
            let claim_id = required_arg(&args, 1, "claim-id")?;
            let (record, next) = orchestrator.inspect(claim_id).await?;
            println!("Claim:       {}", record.claim_id);
            println!("Status:      {}", record.status);
            println!(
                "Next stage:  {}",
                next.map(|s| s.to_string()).unwrap_or_else(|| "done".into())
            );
            if let Some(triage) = &record.triage {
                println!("Triage:      {} ({:.0}%)", triage.label, triage.confidence * 100.0);
            }
            if let Some(analysis) = &record.analysis {
                println!(
                    "Analysis:    {} ({:.0}%) — {}",
                    analysis.recommendation,
                    analysis.confidence * 100.0,
                    analysis.reasoning
                );
            }
            if let Some(decision) = &record.decision {
                println!("Decision:    {} by {}", decision.decision, decision.reviewer);
            }
            if let Some(path) = &record.outputs.review_packet_path {
                println!("Packet:      {path}");
            }
            if let Some(path) = &record.outputs.response_path {
                println!("Draft:       {path}");
            }
            if let Some(path) = &record.outputs.return_label_path {
                println!("Label:       {path}");
            }
            if let Some(receipt) = &record.outputs.dispatch {
                println!(
                    "Dispatch:    {} via {} (duplicate: {})",
                    receipt.status, receipt.provider, receipt.duplicate
                );
            }
            if let Some(error) = &record.error_message {
                println!("Errors:      {error}");
            }
        }

        "review" => {
            let claim_id = required_arg(&args, 1, "claim-id")?;
            let decision_raw = required_arg(&args, 2, "decision")?;
            let decision = Recommendation::parse_lenient(decision_raw)
                .ok_or_else(|| anyhow!("decision must be APPROVE, REJECT, or NEED_INFO"))?;
            let notes = args.get(3..).map(|rest| rest.join(" ")).unwrap_or_default();
            let reviewer = std::env::var("WARRANTY_DESK_REVIEWER")
                .unwrap_or_else(|_| "operator".to_string());

            let advance = orchestrator
                .advance(
                    claim_id,
                    ResumeInput::Decision {
                        decision,
                        notes,
                        reviewer,
                    },
                )
                .await?;
            print_advance(&advance);
        }

        "label" => {
            let claim_id = required_arg(&args, 1, "claim-id")?;
            let path = orchestrator.generate_label(claim_id).await?;
            println!("Label ready: {path}");
        }

        "send" => {
            let claim_id = required_arg(&args, 1, "claim-id")?;
            let advance = orchestrator
                .advance(claim_id, ResumeInput::ConfirmDispatch)
                .await?;
            print_advance(&advance);
        }

        "stats" => {
            let stats = db.stats().await?;
            println!("Total:     {}", stats.total);
            println!("Approved:  {}", stats.approved);
            println!("Rejected:  {}", stats.rejected);
            println!("Need info: {}", stats.need_info);
        }

        other => {
            eprintln!("Unknown command: {other}\n");
            eprint!("{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn required_arg<'a>(args: &'a [String], index: usize, name: &str) -> anyhow::Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing argument: <{name}>"))
}

fn print_advance(advance: &Advance) {
    let record = advance.record();
    match advance {
        Advance::Interrupted(Interrupt::Review, _) => {
            println!(
                "{}  awaiting review — packet: {}",
                record.claim_id,
                record
                    .outputs
                    .review_packet_path
                    .as_deref()
                    .unwrap_or("(none)")
            );
        }
        Advance::Interrupted(Interrupt::Dispatch, _) => {
            println!(
                "{}  awaiting dispatch confirmation — draft: {}",
                record.claim_id,
                record.outputs.response_path.as_deref().unwrap_or("(none)")
            );
            if let Some(error) = &record.error_message {
                println!("  note: {error}");
            }
        }
        Advance::Done(_) => {
            println!("{}  {}", record.claim_id, record.status);
        }
        Advance::Halted(_) => {
            println!(
                "{}  halted: {}",
                record.claim_id,
                record.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
