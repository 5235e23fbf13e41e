//! Graph query adapter
//!
//! Drives the [`WindowOrchestrator`] over the requested continents and year
//! range and turns every forwarded record into an event. Records carry their
//! own coordinates; the continent comes from the classifier, falling back to
//! the continent the query was scoped to.
//!
//! Parameters: `continents` (names, default Europe), `start_year` (default
//! 1800), `end_year` (exclusive, default 1900).

use super::{param_i32, param_list, AdapterServices, Params, RunSummary};
use crate::config::WindowingConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::models::{Continent, Provenance, RawRecord, ResolvedEvent, SkipReason, TimeWindow};
use crate::services::{
    Resolution, ResolutionTier, SummaryClient, TaskHandle, WindowOrchestrator,
};
use crate::types::{RecordForwarder, WindowSource};
use crate::utils::{parse_iso_year, parse_year_label};
use async_trait::async_trait;
use std::sync::Arc;

const DEFAULT_CONTINENT: &str = "Europe";
const DEFAULT_START_YEAR: i32 = 1800;
const DEFAULT_END_YEAR: i32 = 1900;

/// Labels the endpoint falls back to for items without an English name
fn is_entity_id(label: &str) -> bool {
    let mut chars = label.chars();
    chars.next() == Some('Q') && label.len() > 1 && chars.all(|c| c.is_ascii_digit())
}

fn parse_record_year(raw: &str) -> Option<i32> {
    parse_iso_year(raw).or_else(|| parse_year_label(raw))
}

pub struct GraphQueryAdapter {
    orchestrator: WindowOrchestrator,
    source: Arc<dyn WindowSource>,
    summaries: Option<SummaryClient>,
    services: AdapterServices,
}

impl GraphQueryAdapter {
    pub fn new(
        windowing: WindowingConfig,
        source: Arc<dyn WindowSource>,
        summaries: Option<SummaryClient>,
        services: AdapterServices,
    ) -> Self {
        Self {
            orchestrator: WindowOrchestrator::new(windowing),
            source,
            summaries,
            services,
        }
    }

    /// Continent names → scopes; unknown names are logged and dropped
    fn scopes(ctx: &TaskHandle, names: &[String]) -> Vec<Continent> {
        let mut scopes = Vec::new();
        for name in names {
            let continent = Continent::from_name(name);
            if !continent.is_known() {
                ctx.log(format!("Unknown continent '{}'; no queries issued for it", name));
                continue;
            }
            if !scopes.contains(&continent) {
                scopes.push(continent);
            }
        }
        scopes
    }

    pub async fn run(&self, ctx: &TaskHandle, params: &Params) -> AdapterResult<RunSummary> {
        let mut names = param_list(params, "continents");
        if names.is_empty() {
            names.push(DEFAULT_CONTINENT.to_string());
        }
        let start_year = param_i32(params, "start_year")?.unwrap_or(DEFAULT_START_YEAR);
        let end_year = param_i32(params, "end_year")?.unwrap_or(DEFAULT_END_YEAR);
        let range = TimeWindow::new(start_year, end_year)
            .map_err(|e| AdapterError::MissingParameter(format!("start_year/end_year: {}", e)))?;

        let scopes = Self::scopes(ctx, &names);
        ctx.log(format!(
            "Starting graph extraction for {:?} over {}",
            scopes.iter().map(Continent::name).collect::<Vec<_>>(),
            range
        ));

        let mut forwarder = EventForwarder {
            services: &self.services,
            summaries: self.summaries.as_ref(),
            summary: RunSummary::default(),
        };
        let report = self
            .orchestrator
            .run(ctx, &scopes, range, self.source.as_ref(), &mut forwarder)
            .await?;

        let mut summary = forwarder.summary;
        summary.cancelled = report.cancelled;
        ctx.log(format!(
            "{} calls, {} bisections, {} rate-limit retries, {} windows abandoned",
            report.calls,
            report.bisections,
            report.rate_limit_retries,
            report.abandoned.len()
        ));
        Ok(summary)
    }
}

/// Validates, places and writes each orchestrated record
struct EventForwarder<'a> {
    services: &'a AdapterServices,
    summaries: Option<&'a SummaryClient>,
    summary: RunSummary,
}

impl EventForwarder<'_> {
    async fn to_event(&self, scope: Continent, record: RawRecord) -> Result<ResolvedEvent, SkipReason> {
        let name = record
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty() && !is_entity_id(n))
            .ok_or(SkipReason::MissingName)?;
        let raw_year = record.raw_year.as_deref().unwrap_or_default();
        let year = parse_record_year(raw_year)
            .ok_or_else(|| SkipReason::MalformedYear(raw_year.to_string()))?;
        let point = record
            .coordinates
            .filter(|p| !p.is_sentinel())
            .ok_or(SkipReason::MissingCoordinate)?;

        let placement = self.services.resolver.place(
            &Resolution {
                point,
                tier: ResolutionTier::Provided,
            },
            &self.services.classifier,
        );
        let continent = if placement.continent.is_known() {
            placement.continent
        } else {
            scope
        };

        let summary_text = match (self.summaries, record.article_url.as_deref()) {
            (Some(client), Some(url)) => client.fetch(url).await,
            _ => None,
        };
        let description = record.description.clone().unwrap_or_default();
        let content = summary_text.or_else(|| record.description.clone());

        let mut event = ResolvedEvent::new(name, year, placement.location, continent, Provenance::GraphQuery)
            .with_description(description)
            .with_content(content);
        if let Some(end) = record.field_text("end").as_deref().and_then(parse_record_year) {
            if end >= year {
                event = event.with_year_end(end);
            }
        }
        Ok(event)
    }
}

#[async_trait]
impl RecordForwarder for EventForwarder<'_> {
    async fn forward(&mut self, scope: Continent, record: RawRecord) -> atlas_common::Result<()> {
        self.summary.received += 1;
        match self.to_event(scope, record).await {
            Ok(event) => {
                self.services.write_event(&event, &mut self.summary).await?;
            }
            Err(reason) => {
                tracing::debug!(continent = %scope, reason = %reason, "Skipping graph record");
                self.summary.skip(&reason);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_labels() {
        assert!(is_entity_id("Q123456"));
        assert!(!is_entity_id("Q"));
        assert!(!is_entity_id("Quebec Conference"));
        assert!(!is_entity_id("Battle of Q1"));
    }

    #[test]
    fn test_record_year_formats() {
        assert_eq!(parse_record_year("1789-07-14T00:00:00Z"), Some(1789));
        assert_eq!(parse_record_year("-0044-03-15T00:00:00Z"), Some(-44));
        assert_eq!(parse_record_year("44 BC"), Some(-44));
        assert_eq!(parse_record_year(""), None);
    }
}
