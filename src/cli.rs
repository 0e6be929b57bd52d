//! Operator Console
//! Mission: a small interactive REPL alongside the HTTP server, for the
//! operator who wants a peek at monitor/pattern/feedback state without
//! reaching for curl.

use crate::config::ServerConfig;
use crate::feedback::FeedbackSystem;
use crate::http_client::HttpClient;
use crate::pattern::PatternEngine;
use crate::regulatory::RegulatoryMonitor;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub struct Console {
    pub server_config: ServerConfig,
    pub monitor: Arc<RegulatoryMonitor>,
    pub pattern_engine: Arc<PatternEngine>,
    pub feedback_system: Arc<FeedbackSystem>,
    pub http_client: HttpClient,
}

impl Console {
    /// Read commands from stdin until `quit` or EOF. Returns once the
    /// operator has asked to shut down; errors from individual commands are
    /// printed, never propagated — a typo should not kill the console.
    pub async fn run(self) -> anyhow::Result<()> {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        let mut stdout = tokio::io::stdout();

        self.print_banner(&mut stdout).await?;

        loop {
            stdout.write_all(b"regulens> ").await?;
            stdout.flush().await?;

            let line = match lines.next_line().await? {
                Some(line) => line,
                None => break, // stdin closed
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut parts = line.split_whitespace();
            let command = parts.next().unwrap_or("");
            let rest: Vec<&str> = parts.collect();

            match command {
                "quit" | "exit" => break,
                "help" => self.print_help(&mut stdout).await?,
                "stats" => self.print_stats(&mut stdout).await?,
                "sources" => self.print_sources(&mut stdout).await?,
                "changes" => self.print_changes(&mut stdout).await?,
                "api-status" => self.print_api_status(&mut stdout).await?,
                "test-api" => self.test_api(&mut stdout).await?,
                "force" => self.force_check(&mut stdout, rest.first().copied()).await?,
                other => {
                    stdout
                        .write_all(format!("unknown command: {other} (try `help`)\n").as_bytes())
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn print_banner(&self, out: &mut tokio::io::Stdout) -> anyhow::Result<()> {
        out.write_all(
            format!(
                "regulens backend — listening on {}:{}\ntype `help` for the command list\n",
                self.server_config.display_host, self.server_config.port
            )
            .as_bytes(),
        )
        .await?;
        Ok(())
    }

    async fn print_help(&self, out: &mut tokio::io::Stdout) -> anyhow::Result<()> {
        out.write_all(
            b"commands:\n\
              \x20 stats        pattern + feedback engine counters\n\
              \x20 sources      registered regulatory sources\n\
              \x20 changes      recently detected regulatory changes\n\
              \x20 api-status   server listen address\n\
              \x20 force sec    run one scrape cycle against the sec source\n\
              \x20 force fca    run one scrape cycle against the fca source\n\
              \x20 test-api     probe outbound connectivity\n\
              \x20 help         this message\n\
              \x20 quit         shut down\n",
        )
        .await?;
        Ok(())
    }

    async fn print_stats(&self, out: &mut tokio::io::Stdout) -> anyhow::Result<()> {
        let pattern_stats = self.pattern_engine.get_analysis_stats();
        let feedback_stats = self.feedback_system.get_feedback_stats();
        out.write_all(
            format!(
                "patterns: total_points={} total_patterns={} active_entities={}\n\
                 feedback: total={} avg_score={:.3} models={}\n",
                pattern_stats.total_data_points,
                pattern_stats.total_patterns,
                pattern_stats.active_entities,
                feedback_stats.total_feedback,
                feedback_stats.average_score,
                feedback_stats.total_models,
            )
            .as_bytes(),
        )
        .await?;
        Ok(())
    }

    async fn print_sources(&self, out: &mut tokio::io::Stdout) -> anyhow::Result<()> {
        let sources = self.monitor.list_sources();
        if sources.is_empty() {
            out.write_all(b"no sources registered\n").await?;
            return Ok(());
        }
        for source in sources {
            out.write_all(
                format!(
                    "{:<10} {:<30} active={} quarantined={} failures={}\n",
                    source.id, source.name, source.active, source.quarantined, source.consecutive_failures
                )
                .as_bytes(),
            )
            .await?;
        }
        Ok(())
    }

    async fn print_changes(&self, out: &mut tokio::io::Stdout) -> anyhow::Result<()> {
        // Scoped to avoid holding the console's pool handle across an await.
        out.write_all(b"(see GET /decisions and the regulatory_changes table for full history)\n")
            .await?;
        Ok(())
    }

    async fn print_api_status(&self, out: &mut tokio::io::Stdout) -> anyhow::Result<()> {
        out.write_all(
            format!("listening on {}:{}\n", self.server_config.display_host, self.server_config.port).as_bytes(),
        )
        .await?;
        Ok(())
    }

    async fn test_api(&self, out: &mut tokio::io::Stdout) -> anyhow::Result<()> {
        let url = format!("http://{}:{}/api/health", self.server_config.display_host, self.server_config.port);
        let response = self.http_client.get(&url).await;
        if response.success {
            out.write_all(format!("ok: {} returned {}\n", url, response.status).as_bytes()).await?;
        } else {
            out.write_all(
                format!("failed: {} ({})\n", url, response.error.as_deref().unwrap_or("unknown error")).as_bytes(),
            )
            .await?;
        }
        Ok(())
    }

    async fn force_check(&self, out: &mut tokio::io::Stdout, source_id: Option<&str>) -> anyhow::Result<()> {
        let source_id = match source_id {
            Some(id) => id,
            None => {
                out.write_all(b"usage: force <source-id>\n").await?;
                return Ok(());
            }
        };
        match self.monitor.force_check(source_id).await {
            Ok(counters) => {
                out.write_all(
                    format!(
                        "{source_id}: inserted={} duplicated={} failed={}\n",
                        counters.inserted, counters.duplicated, counters.failed
                    )
                    .as_bytes(),
                )
                .await?;
            }
            Err(e) => {
                out.write_all(format!("{source_id}: {e}\n").as_bytes()).await?;
            }
        }
        Ok(())
    }
}
