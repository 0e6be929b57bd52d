//! regulens — compliance monitoring backend
//! Mission: scheduled regulatory scraping, pattern recognition over
//! decisions and activity, a feedback-driven learning loop, and the
//! domain surfaces (decisions, knowledge, memory, transactions, fraud
//! rules) those feed. An interactive operator console runs alongside the
//! HTTP server.

use anyhow::{Context, Result};
use clap::Parser;
use regulens_backend::auth::{AuthHandlers, TokenService, UserStore};
use regulens_backend::cli::Console;
use regulens_backend::config::{ConfigStore, FeedbackConfig, PatternConfig, ServerConfig};
use regulens_backend::db::{self, PoolConfig};
use regulens_backend::domain::{decisions, fraud, knowledge, memory, transactions};
use regulens_backend::feedback::{self, FeedbackSystem};
use regulens_backend::http_client::HttpClient;
use regulens_backend::logging;
use regulens_backend::pattern::{self, PatternEngine};
use regulens_backend::regulatory::models::RegulatorySource;
use regulens_backend::regulatory::{self, RegulatoryMonitor};
use regulens_backend::registry::{Endpoint, HandlerError, HandlerFuture, HttpMethod, Registry, Request, Response};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "regulens", about = "Compliance-and-risk monitoring backend")]
struct Args {
    /// Path to an optional TOML configuration document.
    #[arg(long, env = "REGULENS_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the SQLite database file.
    #[arg(long, env = "DATABASE_PATH", default_value = "regulens.db")]
    db_path: String,

    /// Run the HTTP server without the interactive console (for CI/headless use).
    #[arg(long)]
    no_console: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(error = %e, "fatal initialization failure");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config_store = ConfigStore::load(args.config.as_deref()).context("loading configuration")?;
    let server_config = ServerConfig::from_store(&config_store).context("resolving server configuration")?;
    let pattern_config = PatternConfig::from_store(&config_store);
    let feedback_config = FeedbackConfig::from_store(&config_store);

    let pool = db::open(PoolConfig {
        path: args.db_path.clone(),
        max_connections: 10,
        acquire_timeout: Duration::from_secs(5),
    })
    .context("opening database")?;

    let pattern_engine = Arc::new(PatternEngine::new(pattern_config));
    let feedback_system = Arc::new(FeedbackSystem::new(feedback_config, pattern_engine.clone()));

    let monitor = Arc::new(RegulatoryMonitor::new(pool.clone(), pattern_engine.clone())?);
    seed_default_sources(&monitor)?;

    let token_service = Arc::new(TokenService::new(server_config.jwt_secret.clone(), pool.clone()));
    let user_store = Arc::new(UserStore::new(pool.clone()));
    let auth_handlers = AuthHandlers::new(user_store.clone(), token_service.clone());

    let decision_store = Arc::new(decisions::DecisionStore::new(pool.clone()));
    let knowledge_store = Arc::new(knowledge::KnowledgeStore::new(pool.clone()));
    let memory_store = Arc::new(memory::MemoryStore::new(pool.clone()));
    let transaction_store = Arc::new(transactions::TransactionStore::new(pool.clone()));
    let fraud_store = Arc::new(fraud::FraudRuleStore::new(pool.clone()));
    let http_client = HttpClient::new(Duration::from_secs(10)).context("building http client")?;

    monitor.start();
    pattern_engine.start_background_worker();
    feedback_system.start_background_worker();

    let registry = build_registry(
        auth_handlers,
        decision_store,
        knowledge_store,
        memory_store,
        transaction_store,
        fraud_store,
        monitor.clone(),
        pattern_engine.clone(),
        feedback_system.clone(),
    )?;

    let app = registry
        .into_router(token_service.clone())
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(
            regulens_backend::middleware::request_logging_simple,
        ));

    let addr: SocketAddr = format!("0.0.0.0:{}", server_config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("binding listener")?;
    info!(port = server_config.port, "api server listening");

    let server = axum::serve(listener, app.into_make_service());

    if args.no_console {
        server.await.context("server error")?;
    } else {
        let console = Console {
            server_config,
            monitor: monitor.clone(),
            pattern_engine: pattern_engine.clone(),
            feedback_system: feedback_system.clone(),
            http_client,
        };

        tokio::select! {
            result = server => { result.context("server error")?; }
            result = console.run() => { result.context("console error")?; }
        }
    }

    monitor.shutdown();
    pattern_engine.shutdown();
    feedback_system.shutdown();
    info!("shutdown complete");
    Ok(())
}

fn seed_default_sources(monitor: &RegulatoryMonitor) -> Result<()> {
    let existing: HashSet<String> = monitor.list_sources().into_iter().map(|s| s.id).collect();

    if !existing.contains("sec") {
        monitor.register_source(RegulatorySource {
            id: "sec".to_string(),
            name: "SEC Newsroom".to_string(),
            base_url: "https://www.sec.gov/news/pressreleases".to_string(),
            source_type: "rss".to_string(),
            check_interval_minutes: 60,
            active: true,
            consecutive_failures: 0,
            quarantined: false,
            quarantined_until: None,
        })?;
    }

    if !existing.contains("fca") {
        monitor.register_source(RegulatorySource {
            id: "fca".to_string(),
            name: "FCA News".to_string(),
            base_url: "https://www.fca.org.uk/news".to_string(),
            source_type: "html".to_string(),
            check_interval_minutes: 60,
            active: true,
            consecutive_failures: 0,
            quarantined: false,
            quarantined_until: None,
        })?;
    }

    Ok(())
}

fn roles(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Register every endpoint named in the external interface table. Auth
/// handlers and stores are captured by `Arc` clone per closure; none of
/// this leaks into domain handler signatures, which stay framework- and
/// registry-agnostic.
#[allow(clippy::too_many_arguments)]
fn build_registry(
    auth_handlers: AuthHandlers,
    decision_store: Arc<decisions::DecisionStore>,
    knowledge_store: Arc<knowledge::KnowledgeStore>,
    memory_store: Arc<memory::MemoryStore>,
    transaction_store: Arc<transactions::TransactionStore>,
    fraud_store: Arc<fraud::FraudRuleStore>,
    monitor: Arc<RegulatoryMonitor>,
    pattern_engine: Arc<PatternEngine>,
    feedback_system: Arc<FeedbackSystem>,
) -> Result<Registry> {
    let mut registry = Registry::new();
    let auth_handlers = Arc::new(auth_handlers);

    macro_rules! register {
        ($method:expr, $path:expr, $category:expr, $summary:expr, $auth:expr, $roles:expr, $handler:expr) => {
            registry.register(Endpoint {
                method: $method,
                path_template: $path.to_string(),
                category: $category.to_string(),
                summary: $summary.to_string(),
                auth_required: $auth,
                allowed_roles: $roles,
                handler: $handler,
            })?;
        };
    }

    // Auth
    {
        let h = auth_handlers.clone();
        register!(HttpMethod::Post, "/api/auth/login", "auth", "credentials in; access+refresh tokens out", false, HashSet::new(), Arc::new(move |req: Request| -> HandlerFuture {
            let h = h.clone();
            Box::pin(async move { h.login(req).await })
        }));
    }
    {
        let h = auth_handlers.clone();
        register!(HttpMethod::Post, "/api/auth/refresh", "auth", "rotate refresh; new access", false, HashSet::new(), Arc::new(move |req: Request| -> HandlerFuture {
            let h = h.clone();
            Box::pin(async move { h.refresh(req).await })
        }));
    }
    {
        let h = auth_handlers.clone();
        register!(HttpMethod::Post, "/api/auth/logout", "auth", "revoke presented refresh", true, HashSet::new(), Arc::new(move |req: Request| -> HandlerFuture {
            let h = h.clone();
            Box::pin(async move { h.logout(req).await })
        }));
    }
    {
        let h = auth_handlers.clone();
        register!(HttpMethod::Get, "/api/auth/me", "auth", "caller profile", true, HashSet::new(), Arc::new(move |req: Request| -> HandlerFuture {
            let h = h.clone();
            Box::pin(async move { h.me(req).await })
        }));
    }

    // Health
    register!(HttpMethod::Get, "/api/health", "health", "liveness probe", false, HashSet::new(), Arc::new(|_req: Request| -> HandlerFuture {
        Box::pin(async move { Ok::<Response, HandlerError>(Response::json(200, &serde_json::json!({ "status": "ok" }))) })
    }));

    // Decisions
    let decision_roles = roles(&["user", "admin", "compliance_officer"]);
    let approver_roles = roles(&["admin", "compliance_officer"]);
    {
        let s = decision_store.clone();
        register!(HttpMethod::Get, "/decisions", "decisions", "list with filter/sort/paginate", true, decision_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { decisions::handle_list_decisions(&s, req).await })
        }));
    }
    {
        let s = decision_store.clone();
        register!(HttpMethod::Get, "/decisions/{id}", "decisions", "full decision", true, decision_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { decisions::handle_get_decision(&s, req).await })
        }));
    }
    {
        let s = decision_store.clone();
        register!(HttpMethod::Post, "/decisions", "decisions", "create", true, decision_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { decisions::handle_create_decision(&s, req).await })
        }));
    }
    {
        let s = decision_store.clone();
        register!(HttpMethod::Post, "/decisions/{id}/approve", "decisions", "transition", true, approver_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { decisions::handle_approve_decision(&s, req).await })
        }));
    }
    {
        let s = decision_store.clone();
        register!(HttpMethod::Post, "/decisions/{id}/reject", "decisions", "transition (body: {reason})", true, approver_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { decisions::handle_reject_decision(&s, req).await })
        }));
    }
    {
        let s = decision_store.clone();
        register!(HttpMethod::Delete, "/decisions/{id}", "decisions", "soft delete", true, approver_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { decisions::handle_delete_decision(&s, req).await })
        }));
    }

    // Knowledge
    let knowledge_roles = roles(&["user", "admin"]);
    {
        let s = knowledge_store.clone();
        register!(HttpMethod::Get, "/knowledge/search", "knowledge", "search results", true, knowledge_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { knowledge::handle_search(&s, req).await })
        }));
    }
    {
        let s = knowledge_store.clone();
        register!(HttpMethod::Post, "/knowledge/entries", "knowledge", "create entry", true, knowledge_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { knowledge::handle_create_entry(&s, req).await })
        }));
    }
    {
        let s = knowledge_store.clone();
        register!(HttpMethod::Post, "/knowledge/ask", "knowledge", "RAG Q&A", true, knowledge_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { knowledge::handle_ask(&s, req).await })
        }));
    }

    // Memory
    let memory_roles = roles(&["user", "admin"]);
    {
        let s = memory_store.clone();
        register!(HttpMethod::Post, "/memory/nodes", "memory", "create memory node", true, memory_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { memory::handle_create_node(&s, req).await })
        }));
    }
    {
        let s = memory_store.clone();
        register!(HttpMethod::Get, "/memory/graph", "memory", "node+edge payload", true, memory_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { memory::handle_graph_for_agent(&s, req).await })
        }));
    }

    // Patterns
    let pattern_roles = roles(&["user", "admin", "compliance_officer"]);
    {
        let e = pattern_engine.clone();
        register!(HttpMethod::Get, "/patterns", "patterns", "stored + live patterns", true, pattern_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let e = e.clone();
            Box::pin(async move { pattern::handle_list_patterns(e, req).await })
        }));
    }
    {
        let e = pattern_engine.clone();
        register!(HttpMethod::Post, "/patterns/detect", "patterns", "kick an analysis job; returns counters", true, pattern_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let e = e.clone();
            Box::pin(async move {
                let entity_id = req.query.get("entityId").cloned();
                e.analyze(entity_id.as_deref());
                Ok::<Response, HandlerError>(Response::json(202, &e.get_analysis_stats()))
            })
        }));
    }
    {
        let e = pattern_engine.clone();
        register!(HttpMethod::Get, "/patterns/stats", "patterns", "analysis counters", true, pattern_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let e = e.clone();
            Box::pin(async move { pattern::handle_pattern_stats(e, req).await })
        }));
    }
    {
        let e = pattern_engine.clone();
        register!(HttpMethod::Get, "/patterns/export", "patterns", "raw pattern export", true, pattern_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let e = e.clone();
            Box::pin(async move { pattern::handle_export_patterns(e, req).await })
        }));
    }

    // Feedback
    {
        let f = feedback_system.clone();
        register!(HttpMethod::Post, "/feedback", "feedback", "submit feedback", true, pattern_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let f = f.clone();
            Box::pin(async move { feedback::handle_submit_feedback(f, req).await })
        }));
    }
    {
        let f = feedback_system.clone();
        register!(HttpMethod::Get, "/feedback/stats", "feedback", "learning counters", true, pattern_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let f = f.clone();
            Box::pin(async move { feedback::handle_feedback_stats(f, req).await })
        }));
    }
    {
        let f = feedback_system.clone();
        register!(HttpMethod::Get, "/feedback/export", "feedback", "raw feedback export", true, pattern_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let f = f.clone();
            Box::pin(async move { feedback::handle_export_feedback(f, req).await })
        }));
    }

    // Transactions
    let transaction_roles = roles(&["user", "admin", "compliance_officer"]);
    {
        let s = transaction_store.clone();
        register!(HttpMethod::Post, "/transactions", "transactions", "create", true, transaction_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { transactions::handle_create_transaction(&s, req).await })
        }));
    }
    {
        let s = transaction_store.clone();
        register!(HttpMethod::Post, "/transactions/{id}/approve", "transactions", "approve pending transaction", true, approver_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { transactions::handle_approve_transaction(&s, req).await })
        }));
    }
    {
        let s = transaction_store.clone();
        register!(HttpMethod::Post, "/transactions/{id}/reject", "transactions", "reject pending transaction", true, approver_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { transactions::handle_reject_transaction(&s, req).await })
        }));
    }

    // Fraud rules
    {
        let s = fraud_store.clone();
        register!(HttpMethod::Get, "/fraud/rules", "fraud", "list rules", true, approver_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { fraud::handle_list_fraud_rules(&s, req).await })
        }));
    }
    {
        let s = fraud_store.clone();
        register!(HttpMethod::Post, "/fraud/rules", "fraud", "create rule", true, approver_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { fraud::handle_create_fraud_rule(&s, req).await })
        }));
    }
    {
        let s = fraud_store.clone();
        register!(HttpMethod::Delete, "/fraud/rules/{id}", "fraud", "deactivate rule", true, approver_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let s = s.clone();
            Box::pin(async move { fraud::handle_deactivate_fraud_rule(&s, req).await })
        }));
    }

    // Regulatory sources
    {
        let m = monitor.clone();
        register!(HttpMethod::Get, "/sources", "regulatory", "registered regulatory sources", true, approver_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let m = m.clone();
            Box::pin(async move { regulatory::handle_list_sources(m, req).await })
        }));
    }
    {
        let m = monitor.clone();
        register!(HttpMethod::Post, "/sources/{id}/force-check", "regulatory", "run one scrape cycle now", true, approver_roles.clone(), Arc::new(move |req: Request| -> HandlerFuture {
            let m = m.clone();
            Box::pin(async move {
                let source_id = req.params.get("id").cloned().ok_or_else(|| HandlerError::validation("missing id"))?;
                regulatory::handle_force_check(m, source_id).await
            })
        }));
    }

    Ok(registry)
}
