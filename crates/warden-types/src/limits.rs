use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a named limit. Determines the value representation and whether
/// buffer/clamp arithmetic applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    Rate,
    Count,
    Size,
    Duration,
    Percentage,
}

impl LimitType {
    /// Durations are opaque strings; everything else is numeric.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, LimitType::Duration)
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LimitType::Rate => "rate",
            LimitType::Count => "count",
            LimitType::Size => "size",
            LimitType::Duration => "duration",
            LimitType::Percentage => "percentage",
        };
        f.write_str(s)
    }
}

/// A limit value, tagged by kind.
///
/// Serializes to the natural scalar for each variant so the runtime-overrides
/// document stays plain YAML (`ingestion_rate: 7500`, `compactor_blocks_retention_period: "24h"`).
/// Deserialization recovers the variant from the scalar shape: integers become
/// counts, floats become rates, strings become durations. [`LimitValue::coerce`]
/// re-tags a scalar once the matching [`LimitDefinition`] is known.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitValue {
    Rate(f64),
    Count(i64),
    Size(u64),
    Duration(String),
    Percent(f64),
}

impl LimitValue {
    /// Numeric view of the value. `None` for durations.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LimitValue::Rate(v) | LimitValue::Percent(v) => Some(*v),
            LimitValue::Count(v) => Some(*v as f64),
            LimitValue::Size(v) => Some(*v as f64),
            LimitValue::Duration(_) => None,
        }
    }

    /// Build a value of the given type from a raw recommendation.
    ///
    /// Counts and sizes round half-up; negative inputs floor at zero for the
    /// unsigned kinds.
    pub fn from_f64(limit_type: LimitType, v: f64) -> Self {
        match limit_type {
            LimitType::Rate => LimitValue::Rate(v),
            LimitType::Count => LimitValue::Count(v.round() as i64),
            LimitType::Size => LimitValue::Size(v.round().max(0.0) as u64),
            LimitType::Percentage => LimitValue::Percent(v),
            LimitType::Duration => LimitValue::Duration(format!("{}s", v.round() as i64)),
        }
    }

    /// Re-tag a shape-deserialized scalar to match a definition's type.
    ///
    /// Durations never coerce to numerics and vice versa.
    pub fn coerce(&self, limit_type: LimitType) -> Option<Self> {
        match (self, limit_type.is_numeric()) {
            (LimitValue::Duration(s), false) => Some(LimitValue::Duration(s.clone())),
            (LimitValue::Duration(_), true) => None,
            (_, false) => None,
            (v, true) => v.as_f64().map(|f| Self::from_f64(limit_type, f)),
        }
    }

    /// Multiply a numeric value by `factor`; durations pass through untouched.
    pub fn scaled(&self, factor: f64) -> Self {
        match self {
            LimitValue::Rate(v) => LimitValue::Rate(v * factor),
            LimitValue::Percent(v) => LimitValue::Percent(v * factor),
            LimitValue::Count(v) => LimitValue::Count(((*v as f64) * factor).round() as i64),
            LimitValue::Size(v) => {
                LimitValue::Size(((*v as f64) * factor).round().max(0.0) as u64)
            }
            LimitValue::Duration(s) => LimitValue::Duration(s.clone()),
        }
    }

    /// The kind this value carries.
    pub fn limit_type(&self) -> LimitType {
        match self {
            LimitValue::Rate(_) => LimitType::Rate,
            LimitValue::Count(_) => LimitType::Count,
            LimitValue::Size(_) => LimitType::Size,
            LimitValue::Duration(_) => LimitType::Duration,
            LimitValue::Percent(_) => LimitType::Percentage,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            LimitValue::Rate(v) | LimitValue::Percent(v) => *v == 0.0,
            LimitValue::Count(v) => *v == 0,
            LimitValue::Size(v) => *v == 0,
            LimitValue::Duration(s) => s.is_empty(),
        }
    }
}

impl fmt::Display for LimitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitValue::Rate(v) | LimitValue::Percent(v) => write!(f, "{v}"),
            LimitValue::Count(v) => write!(f, "{v}"),
            LimitValue::Size(v) => write!(f, "{v}"),
            LimitValue::Duration(s) => f.write_str(s),
        }
    }
}

impl Serialize for LimitValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LimitValue::Rate(v) | LimitValue::Percent(v) => serializer.serialize_f64(*v),
            LimitValue::Count(v) => serializer.serialize_i64(*v),
            LimitValue::Size(v) => serializer.serialize_u64(*v),
            LimitValue::Duration(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for LimitValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> de::Visitor<'de> for ValueVisitor {
            type Value = LimitValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or a duration string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<LimitValue, E> {
                Ok(LimitValue::Count(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<LimitValue, E> {
                if v <= i64::MAX as u64 {
                    Ok(LimitValue::Count(v as i64))
                } else {
                    Ok(LimitValue::Size(v))
                }
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<LimitValue, E> {
                Ok(LimitValue::Rate(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<LimitValue, E> {
                Ok(LimitValue::Duration(v.to_string()))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Static description of one named limit, loaded from configuration at
/// startup and immutable afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub limit_type: LimitType,
    /// Metric family that drives this limit, if any. Limits without a source
    /// are carried at their defaults and never synthesized from observations.
    #[serde(default)]
    pub metric_source: Option<String>,
    #[serde(default)]
    pub default: Option<LimitValue>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Headroom percentage applied on top of the recommendation, `[0, 1000]`.
    #[serde(default)]
    pub buffer_pct: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl LimitDefinition {
    pub fn new(name: impl Into<String>, limit_type: LimitType) -> Self {
        Self {
            name: name.into(),
            limit_type,
            metric_source: None,
            default: None,
            min: None,
            max: None,
            buffer_pct: 0.0,
            enabled: true,
        }
    }

    /// Turn a raw recommendation into the final value: apply the buffer
    /// factor, clamp into `[min, max]`, then tag with the definition's type.
    ///
    /// Duration-typed definitions are not synthesized from numbers; callers
    /// keep their configured defaults instead.
    pub fn synthesize(&self, recommended: f64) -> Option<LimitValue> {
        if !self.limit_type.is_numeric() {
            return None;
        }
        let mut value = recommended * (1.0 + self.buffer_pct / 100.0);
        if let Some(min) = self.min {
            value = value.max(min);
        }
        if let Some(max) = self.max {
            value = value.min(max);
        }
        Some(LimitValue::from_f64(self.limit_type, value))
    }

    /// Clamp an already-built numeric value into `[min, max]`.
    pub fn clamp(&self, value: &LimitValue) -> LimitValue {
        match value.as_f64() {
            Some(v) if self.limit_type.is_numeric() => {
                let clamped = v
                    .max(self.min.unwrap_or(f64::NEG_INFINITY))
                    .min(self.max.unwrap_or(f64::INFINITY));
                LimitValue::from_f64(self.limit_type, clamped)
            }
            _ => value.clone(),
        }
    }
}

/// The full set of limit values computed for one tenant.
///
/// Regenerated on every reconciliation pass; only limits enabled by
/// configuration are ever written to the shared document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantLimits {
    pub tenant: String,
    pub limits: BTreeMap<String, LimitValue>,
    pub last_updated: DateTime<Utc>,
    pub reason: String,
    pub source: String,
}

impl TenantLimits {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            limits: BTreeMap::new(),
            last_updated: Utc::now(),
            reason: String::new(),
            source: "analyzer".to_string(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: LimitValue) {
        self.limits.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&LimitValue> {
        self.limits.get(name)
    }

    /// Scale every numeric limit value in place. Durations are untouched.
    pub fn scale_numeric(&mut self, factor: f64) {
        for value in self.limits.values_mut() {
            if value.limit_type().is_numeric() {
                *value = value.scaled(factor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(min: f64, max: f64, buffer_pct: f64) -> LimitDefinition {
        LimitDefinition {
            name: "ingestion_rate".into(),
            limit_type: LimitType::Rate,
            metric_source: Some("samples_in_total".into()),
            default: Some(LimitValue::Rate(10_000.0)),
            min: Some(min),
            max: Some(max),
            buffer_pct,
            enabled: true,
        }
    }

    #[test]
    fn synthesize_applies_buffer_then_clamp() {
        let d = def(1_000.0, 100_000.0, 20.0);
        // 200_000 * 1.2 clamps down to max.
        assert_eq!(d.synthesize(200_000.0), Some(LimitValue::Rate(100_000.0)));
        // Tiny values clamp up to min.
        assert_eq!(d.synthesize(10.0), Some(LimitValue::Rate(1_000.0)));
        // In-range values pick up the buffer.
        assert_eq!(d.synthesize(5_000.0), Some(LimitValue::Rate(6_000.0)));
    }

    #[test]
    fn synthesize_skips_durations() {
        let d = LimitDefinition::new("compactor_blocks_retention_period", LimitType::Duration);
        assert_eq!(d.synthesize(42.0), None);
    }

    #[test]
    fn count_values_round() {
        let d = LimitDefinition {
            limit_type: LimitType::Count,
            ..def(0.0, 1_000_000.0, 10.0)
        };
        assert_eq!(d.synthesize(100.4), Some(LimitValue::Count(110)));
    }

    #[test]
    fn scaled_preserves_durations() {
        let v = LimitValue::Duration("24h".into());
        assert_eq!(v.scaled(0.5), LimitValue::Duration("24h".into()));
        assert_eq!(LimitValue::Rate(100.0).scaled(0.5), LimitValue::Rate(50.0));
        assert_eq!(LimitValue::Count(101).scaled(0.5), LimitValue::Count(51));
    }

    #[test]
    fn serde_round_trips_natural_scalars() {
        let yaml = serde_yaml::to_string(&LimitValue::Count(30)).unwrap();
        assert_eq!(yaml.trim(), "30");

        let yaml = serde_yaml::to_string(&LimitValue::Duration("1h30m".into())).unwrap();
        assert_eq!(yaml.trim(), "1h30m");

        let v: LimitValue = serde_yaml::from_str("7500").unwrap();
        assert_eq!(v, LimitValue::Count(7500));
        let v: LimitValue = serde_yaml::from_str("7500.5").unwrap();
        assert_eq!(v, LimitValue::Rate(7500.5));
        let v: LimitValue = serde_yaml::from_str("\"15m\"").unwrap();
        assert_eq!(v, LimitValue::Duration("15m".into()));
    }

    #[test]
    fn coerce_retags_by_definition_type() {
        let raw: LimitValue = serde_yaml::from_str("500").unwrap();
        assert_eq!(raw.coerce(LimitType::Rate), Some(LimitValue::Rate(500.0)));
        assert_eq!(raw.coerce(LimitType::Size), Some(LimitValue::Size(500)));
        assert_eq!(raw.coerce(LimitType::Duration), None);

        let dur = LimitValue::Duration("2h".into());
        assert_eq!(dur.coerce(LimitType::Rate), None);
        assert_eq!(
            dur.coerce(LimitType::Duration),
            Some(LimitValue::Duration("2h".into()))
        );
    }

    #[test]
    fn scale_numeric_leaves_durations_alone() {
        let mut tl = TenantLimits::new("t1");
        tl.set("ingestion_rate", LimitValue::Rate(1_000.0));
        tl.set("retention", LimitValue::Duration("30d".into()));
        tl.scale_numeric(0.1);

        assert_eq!(tl.get("ingestion_rate"), Some(&LimitValue::Rate(100.0)));
        assert_eq!(
            tl.get("retention"),
            Some(&LimitValue::Duration("30d".into()))
        );
    }
}
