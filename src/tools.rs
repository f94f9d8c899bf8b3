use std::{sync::Arc, time::Duration};

use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::{
    cache::{Clock, DatasetCache},
    models::{IndexSnapshot, MarketDepth, MatrixError, PriceMatrix, Shape},
    pricing::{self, PricingError},
    render::{depth_text, index_text, price_quote_text, PriceQuoteView},
    upstream::{DatasetProvider, Resource, UpstreamError},
};

const INDEX_KEY: &str = "dcx_index";
const DEPTH_KEY: &str = "market_depth";

const PRICE_SOURCE: &str = "OpenFacet.net API";
const INDEX_SOURCE: &str = "OpenFacet DCX Index";
const DEPTH_SOURCE: &str = "OpenFacet Market Depth";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Data(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl From<PricingError> for ToolError {
    fn from(err: PricingError) -> Self {
        if err.is_validation() {
            Self::Validation(err.to_string())
        } else {
            Self::Data(err.to_string())
        }
    }
}

impl From<MatrixError> for ToolError {
    fn from(err: MatrixError) -> Self {
        Self::Data(format!("Invalid price matrix: {err}"))
    }
}

/// The closed set of callable tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    GetDiamondPrice,
    GetDcxIndex,
    GetMarketDepth,
}

impl ToolName {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "get_diamond_price" => Some(Self::GetDiamondPrice),
            "get_dcx_index" => Some(Self::GetDcxIndex),
            "get_market_depth" => Some(Self::GetMarketDepth),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetDiamondPrice => "get_diamond_price",
            Self::GetDcxIndex => "get_dcx_index",
            Self::GetMarketDepth => "get_market_depth",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuery {
    pub carat: f64,
    pub color: String,
    pub clarity: String,
    pub shape: Shape,
}

impl PriceQuery {
    pub fn from_args(args: &Value) -> Result<Self, ToolError> {
        let carat = args
            .get("carat")
            .and_then(Value::as_f64)
            .ok_or(PricingError::CaratOutOfRange(f64::NAN))
            .and_then(pricing::validate_carat)?;
        let color = require_str(args, "color")?;
        let clarity = require_str(args, "clarity")?;
        let shape = match args.get("shape") {
            None | Some(Value::Null) => Shape::default(),
            Some(value) => value.as_str().and_then(Shape::parse).ok_or_else(|| {
                ToolError::Validation(format!("Invalid shape: {}", display_value(value)))
            })?,
        };

        Ok(Self {
            carat,
            color,
            clarity,
            shape,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DepthQuery {
    pub carat: Option<f64>,
}

impl DepthQuery {
    pub fn from_args(args: &Value) -> Result<Self, ToolError> {
        let carat = match args.get("carat") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_f64()
                    .ok_or(PricingError::CaratOutOfRange(f64::NAN))
                    .and_then(pricing::validate_carat)?,
            ),
        };
        Ok(Self { carat })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub content: Vec<TextContent>,
    #[serde(rename = "_meta")]
    pub meta: Value,
}

impl ToolOutput {
    fn text(text: String, meta: Value) -> Self {
        Self {
            content: vec![TextContent { kind: "text", text }],
            meta,
        }
    }
}

/// Query handlers backed by cached upstream datasets.
pub struct QueryService {
    provider: Arc<dyn DatasetProvider>,
    clock: Arc<dyn Clock>,
    matrices: DatasetCache<Arc<PriceMatrix>>,
    index: DatasetCache<Arc<IndexSnapshot>>,
    depth: DatasetCache<Arc<MarketDepth>>,
}

impl QueryService {
    pub fn new(provider: Arc<dyn DatasetProvider>, freshness: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            matrices: DatasetCache::new(freshness, clock.clone()),
            index: DatasetCache::new(freshness, clock.clone()),
            depth: DatasetCache::new(freshness, clock.clone()),
            clock,
        }
    }

    pub async fn call(&self, tool: ToolName, args: &Value) -> Result<ToolOutput, ToolError> {
        match tool {
            ToolName::GetDiamondPrice => self.diamond_price(PriceQuery::from_args(args)?).await,
            ToolName::GetDcxIndex => self.dcx_index().await,
            ToolName::GetMarketDepth => self.market_depth(DepthQuery::from_args(args)?).await,
        }
    }

    pub async fn diamond_price(&self, query: PriceQuery) -> Result<ToolOutput, ToolError> {
        let matrix = self.load_matrix(query.shape).await?;
        let per_carat = pricing::price_per_carat(query.carat, &matrix, &query.color, &query.clarity)?;
        let total = per_carat as f64 * query.carat;
        debug!(
            carat = query.carat,
            color = %query.color,
            clarity = %query.clarity,
            shape = %query.shape,
            per_carat,
            "Priced diamond"
        );

        let text = price_quote_text(&PriceQuoteView {
            carat: query.carat,
            color: &query.color,
            clarity: &query.clarity,
            shape: query.shape,
            per_carat,
            total,
        });
        let meta = json!({
            "timestamp": self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "source": PRICE_SOURCE,
        });
        Ok(ToolOutput::text(text, meta))
    }

    pub async fn dcx_index(&self) -> Result<ToolOutput, ToolError> {
        let index = self
            .index
            .get_or_load(INDEX_KEY, || async {
                let document = self.provider.fetch(Resource::Index).await?;
                let snapshot = serde_json::from_value::<IndexSnapshot>(document)
                    .map_err(|err| ToolError::Data(format!("Invalid index dataset: {err}")))?;
                Ok::<_, ToolError>(Arc::new(snapshot))
            })
            .await?;

        let meta = json!({
            "timestamp": index.ts.as_value(),
            "source": INDEX_SOURCE,
            "dcx_value": index.dcx,
            "trend_percent": index.trend,
        });
        Ok(ToolOutput::text(index_text(&index), meta))
    }

    pub async fn market_depth(&self, query: DepthQuery) -> Result<ToolOutput, ToolError> {
        let depth = self
            .depth
            .get_or_load(DEPTH_KEY, || async {
                let document = self.provider.fetch(Resource::Depth).await?;
                let depth = serde_json::from_value::<MarketDepth>(document)
                    .map_err(|err| ToolError::Data(format!("Invalid market depth dataset: {err}")))?;
                Ok::<_, ToolError>(Arc::new(depth))
            })
            .await?;

        let mut meta = Map::new();
        meta.insert("timestamp".to_string(), depth.ts.as_value().clone());
        meta.insert("source".to_string(), json!(DEPTH_SOURCE));
        if let Some(carat) = query.carat {
            meta.insert("carat_filter".to_string(), json!(carat));
        }
        Ok(ToolOutput::text(depth_text(&depth, query.carat), Value::Object(meta)))
    }

    async fn load_matrix(&self, shape: Shape) -> Result<Arc<PriceMatrix>, ToolError> {
        self.matrices
            .get_or_load(shape.cache_key(), || async {
                let document = self.provider.fetch(Resource::Matrix(shape)).await?;
                Ok::<_, ToolError>(Arc::new(PriceMatrix::from_value(document)?))
            })
            .await
    }
}

fn require_str(args: &Value, field: &str) -> Result<String, ToolError> {
    args.get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::Validation(format!("Missing required string field: {field}")))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        cache::testing::ManualClock,
        upstream::testing::{sample_provider, StaticProvider},
    };

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn service(provider: Arc<StaticProvider>) -> (QueryService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (QueryService::new(provider, DAY, clock.clone()), clock)
    }

    fn text(output: &ToolOutput) -> &str {
        &output.content[0].text
    }

    #[tokio::test]
    async fn prices_sample_scenario() {
        let (service, _) = service(Arc::new(sample_provider()));
        let output = service
            .call(
                ToolName::GetDiamondPrice,
                &json!({"carat": 0.35, "color": "D", "clarity": "FL"}),
            )
            .await
            .expect("price");

        assert!(text(&output).contains("• Per Carat: $493"));
        assert!(text(&output).contains("• Total Price: $172.55"));
        assert_eq!(output.meta["source"], "OpenFacet.net API");
        assert_eq!(output.meta["timestamp"], "2024-05-01T12:00:00.000Z");
    }

    #[tokio::test]
    async fn matrix_is_fetched_once_per_window() {
        let provider = Arc::new(sample_provider());
        let (service, clock) = service(provider.clone());
        let args = json!({"carat": 0.31, "color": "E", "clarity": "IF", "shape": "round"});

        for _ in 0..3 {
            service.call(ToolName::GetDiamondPrice, &args).await.expect("price");
        }
        assert_eq!(provider.fetches(), 1);

        clock.advance(chrono::Duration::hours(24));
        service.call(ToolName::GetDiamondPrice, &args).await.expect("price");
        assert_eq!(provider.fetches(), 2);
    }

    #[tokio::test]
    async fn unknown_color_names_the_value() {
        let (service, _) = service(Arc::new(sample_provider()));
        let err = service
            .call(
                ToolName::GetDiamondPrice,
                &json!({"carat": 0.35, "color": "Z", "clarity": "FL"}),
            )
            .await
            .unwrap_err();

        assert!(matches!(&err, ToolError::Validation(msg) if msg == "Invalid color: Z"));
    }

    #[tokio::test]
    async fn carat_is_validated_before_fetching() {
        let provider = Arc::new(sample_provider());
        let (service, _) = service(provider.clone());

        for args in [
            json!({"carat": 0.2, "color": "D", "clarity": "FL"}),
            json!({"carat": "1.0", "color": "D", "clarity": "FL"}),
            json!({"color": "D", "clarity": "FL"}),
        ] {
            let err = service.call(ToolName::GetDiamondPrice, &args).await.unwrap_err();
            assert_eq!(err.to_string(), "Carat must be a number between 0.3 and 6.0");
        }
        assert_eq!(provider.fetches(), 0);
    }

    #[tokio::test]
    async fn unsupported_shape_is_rejected() {
        let (service, _) = service(Arc::new(sample_provider()));
        let err = service
            .call(
                ToolName::GetDiamondPrice,
                &json!({"carat": 1.0, "color": "D", "clarity": "FL", "shape": "oval"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid shape: oval");
    }

    #[tokio::test]
    async fn missing_breakpoint_is_a_data_error() {
        let (service, _) = service(Arc::new(sample_provider()));
        let err = service
            .call(
                ToolName::GetDiamondPrice,
                &json!({"carat": 1.2, "color": "D", "clarity": "FL"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Data(_)));
    }

    #[tokio::test]
    async fn cushion_reads_its_own_dataset() {
        let provider = Arc::new(sample_provider());
        let (service, _) = service(provider.clone());
        let err = service
            .call(
                ToolName::GetDiamondPrice,
                &json!({"carat": 0.35, "color": "D", "clarity": "FL", "shape": "cushion"}),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::Upstream(UpstreamError::Status { status: 404, .. })));
        assert_eq!(err.to_string(), "HTTP 404 from matrix_cushion.json");
    }

    #[tokio::test]
    async fn malformed_matrix_is_not_cached() {
        let provider = Arc::new(StaticProvider::default().with(
            Resource::Matrix(Shape::Round),
            json!({"r": ["D"], "c": ["FL"], "l": {"0.3": [6.0, 6.1]}, "s": [1, 1]}),
        ));
        let (service, _) = service(provider.clone());
        let args = json!({"carat": 0.35, "color": "D", "clarity": "FL"});

        for _ in 0..2 {
            let err = service.call(ToolName::GetDiamondPrice, &args).await.unwrap_err();
            assert!(matches!(err, ToolError::Data(_)));
        }
        assert_eq!(provider.fetches(), 2);
    }

    #[tokio::test]
    async fn index_snapshot_carries_raw_values() {
        let (service, _) = service(Arc::new(sample_provider()));
        let output = service.call(ToolName::GetDcxIndex, &Value::Null).await.expect("index");

        assert!(text(&output).contains("**Current Index:** $5,123.45/carat"));
        assert!(text(&output).contains("📈 +1.25%"));
        assert!(text(&output).contains("• 1.5ct E FL: $5,100/ct"));
        assert_eq!(output.meta["dcx_value"], 5123.45);
        assert_eq!(output.meta["trend_percent"], 1.25);
        assert_eq!(output.meta["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(output.meta["source"], "OpenFacet DCX Index");
    }

    #[tokio::test]
    async fn depth_filter_sorts_breakdowns() {
        let (service, _) = service(Arc::new(sample_provider()));
        let output = service
            .call(ToolName::GetMarketDepth, &json!({"carat": 1.0}))
            .await
            .expect("depth");

        let body = text(&output);
        assert!(body.find("VVS1: 20").expect("vvs1") < body.find("IF: 10").expect("if"));
        assert!(body.find("E: 25").expect("e") < body.find("D: 15").expect("d"));
        assert_eq!(output.meta["carat_filter"], 1.0);
    }

    #[tokio::test]
    async fn depth_overview_has_no_filter_meta() {
        let (service, _) = service(Arc::new(sample_provider()));
        let output = service
            .call(ToolName::GetMarketDepth, &json!({}))
            .await
            .expect("depth");

        assert!(text(&output).contains("• E/VVS1: 18 stones"));
        assert!(output.meta.get("carat_filter").is_none());
    }

    #[tokio::test]
    async fn depth_ties_follow_upstream_document_order() {
        let provider = Arc::new(StaticProvider::default().with(
            Resource::Depth,
            json!({
                "ts": 0,
                "clarity": {"1.0": {"VS2": 5, "IF": 5, "FL": 9}},
                "color": {"1.0": {"K": 3, "D": 3}},
                "colclar": {"Z/SI2": 5, "A/FL": 5, "M/VS1": 7}
            }),
        ));
        let (service, _) = service(provider);

        let overview = service
            .call(ToolName::GetMarketDepth, &json!({}))
            .await
            .expect("depth");
        let body = text(&overview);
        let m = body.find("• M/VS1: 7 stones").expect("M/VS1");
        let z = body.find("• Z/SI2: 5 stones").expect("Z/SI2");
        let a = body.find("• A/FL: 5 stones").expect("A/FL");
        assert!(m < z);
        assert!(z < a, "equal counts keep document order");

        let filtered = service
            .call(ToolName::GetMarketDepth, &json!({"carat": 1.0}))
            .await
            .expect("depth");
        let body = text(&filtered);
        let fl = body.find("• FL: 9").expect("FL");
        let vs2 = body.find("• VS2: 5").expect("VS2");
        let if_ = body.find("• IF: 5").expect("IF");
        assert!(fl < vs2 && vs2 < if_);
        assert!(body.find("• K: 3").expect("K") < body.find("• D: 3").expect("D"));
    }

    #[tokio::test]
    async fn depth_filter_is_range_checked() {
        let (service, _) = service(Arc::new(sample_provider()));
        let err = service
            .call(ToolName::GetMarketDepth, &json!({"carat": 9.0}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[test]
    fn tool_names_round_trip() {
        for tool in [
            ToolName::GetDiamondPrice,
            ToolName::GetDcxIndex,
            ToolName::GetMarketDepth,
        ] {
            assert_eq!(ToolName::from_name(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolName::from_name("get_weather"), None);
    }
}
