use clap::Parser;

use aegis_replication::ResolutionChoice;

use super::utils::{info, success};
use crate::app::App;

#[derive(Parser)]
pub struct ResolveArgs {
    /// Conflict record id
    pub conflict_id: uuid::Uuid,

    /// Resolution: `source`, `target`, or a literal JSON document
    pub choice: String,
}

fn parse_choice(raw: &str) -> anyhow::Result<ResolutionChoice> {
    match raw {
        "source" => Ok(ResolutionChoice::Source),
        "target" => Ok(ResolutionChoice::Target),
        other => {
            let value: serde_json::Value = serde_json::from_str(other)
                .map_err(|e| anyhow::anyhow!("resolution is neither source/target nor valid JSON: {}", e))?;
            Ok(ResolutionChoice::Custom(serde_json::to_vec(&value)?))
        }
    }
}

pub async fn execute(app: App, args: ResolveArgs) -> anyhow::Result<()> {
    let choice = parse_choice(&args.choice)?;

    let regions = app.connect_all_regions().await?;
    let replicator = app.replicator(regions)?;

    let record = replicator.resolve_conflict(args.conflict_id, choice).await?;
    info(&format!(
        "Conflict {} on {}/{} ({} -> {})",
        record.id, record.container, record.entity_id, record.source_region, record.target_region
    ));
    success("Conflict resolved and applied to the target region");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_choice_keywords() {
        assert!(matches!(
            parse_choice("source").unwrap(),
            ResolutionChoice::Source
        ));
        assert!(matches!(
            parse_choice("target").unwrap(),
            ResolutionChoice::Target
        ));
    }

    #[test]
    fn test_parse_choice_json() {
        match parse_choice(r#"{"_id": "a", "v": "merged"}"#).unwrap() {
            ResolutionChoice::Custom(payload) => {
                let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
                assert_eq!(value.get("v").unwrap(), "merged");
            }
            _ => panic!("expected custom payload"),
        }
    }

    #[test]
    fn test_parse_choice_rejects_garbage() {
        assert!(parse_choice("neither-keyword-nor-json").is_err());
    }
}
