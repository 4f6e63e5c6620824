//! typed view of the JSON plant/problem model. deserialization is
//! structural (serde) and validation is a separate pass so that error
//! messages can name the offending field and index.

use crate::lp::Method;
use anyhow::Context;
use serde::Deserialize;

/// one side of a box constraint. absent or null means unbounded.
pub type Side = Option<f64>;

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub state_num: usize,
    pub input_num: usize,
    pub len_horizon: usize,
    pub len_ctrl: usize,
    #[serde(rename = "state_Ad")]
    pub state_ad: Vec<f64>,
    #[serde(rename = "input_Bd")]
    pub input_bd: Vec<f64>,
    pub input_bounds: Vec<(Side, Side)>,
    #[serde(default)]
    pub input_rate_max: Option<Vec<Side>>,
    pub state_weight: Vec<f64>,
    #[serde(default)]
    pub state_bounds: Option<Vec<(Side, Side)>>,
    #[serde(default)]
    pub state_init: Option<Vec<f64>>,
    pub cost_model: CostModel,
    #[serde(default)]
    pub solver: SolverConfig,
}

/// the optimization goal, selected by the "type" tag
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum CostModel {
    /// exponentially increasing weights on the state norms push the
    /// state to zero in as few steps as possible
    #[serde(rename = "min_steps_to_zero")]
    MinStepsToZero { coef: f64 },
    /// same state cost, plus an L1 penalty on the inputs
    #[serde(rename = "min_state_input_norms")]
    MinStateInputNorms { coef: f64, input_weight: Vec<f64> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub method: Method,
    pub iter_limit: i32,
    pub time_limit: f64,
    pub verbose: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: Method::Dual,
            iter_limit: i32::MAX,
            time_limit: f64::INFINITY,
            verbose: false,
        }
    }
}

impl ModelConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading model file {}", path))?;
        let config: Self =
            serde_json::from_str(&text).with_context(|| format!("parsing model file {}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// shape checks that serde cannot express. every failure names the
    /// field and, where it applies, the index.
    pub fn validate(&self) -> anyhow::Result<()> {
        let (n, m) = (self.state_num, self.input_num);
        if n == 0 {
            anyhow::bail!("state_num must be positive");
        }
        if m == 0 {
            anyhow::bail!("input_num must be positive");
        }
        if self.len_horizon == 0 {
            anyhow::bail!("len_horizon must be positive");
        }
        if self.len_ctrl > self.len_horizon {
            anyhow::bail!(
                "len_ctrl ({}) exceeds len_horizon ({})",
                self.len_ctrl,
                self.len_horizon
            );
        }
        Self::expect_len("state_Ad", self.state_ad.len(), n * n)?;
        Self::expect_len("input_Bd", self.input_bd.len(), n * m)?;
        Self::expect_len("input_bounds", self.input_bounds.len(), m)?;
        Self::expect_len("state_weight", self.state_weight.len(), n)?;
        if let Some(rates) = &self.input_rate_max {
            Self::expect_len("input_rate_max", rates.len(), m)?;
        }
        if let Some(bounds) = &self.state_bounds {
            Self::expect_len("state_bounds", bounds.len(), n)?;
        }
        if let Some(x0) = &self.state_init {
            Self::expect_len("state_init", x0.len(), n)?;
        }
        if let CostModel::MinStateInputNorms { input_weight, .. } = &self.cost_model {
            Self::expect_len("input_weight", input_weight.len(), m)?;
        }
        for (i, x) in self.state_ad.iter().enumerate() {
            if !x.is_finite() {
                anyhow::bail!("state_Ad[{}] is not a finite number", i);
            }
        }
        for (i, x) in self.input_bd.iter().enumerate() {
            if !x.is_finite() {
                anyhow::bail!("input_Bd[{}] is not a finite number", i);
            }
        }
        for (i, w) in self.state_weight.iter().enumerate() {
            if !w.is_finite() || *w < 0. {
                anyhow::bail!("state_weight[{}] must be finite and nonnegative", i);
            }
        }
        Ok(())
    }

    fn expect_len(field: &str, got: usize, want: usize) -> anyhow::Result<()> {
        if got != want {
            anyhow::bail!("wrong size of {}: expected {}, got {}", field, want, got)
        } else {
            Ok(())
        }
    }

    /// per-input maximum rate; a negative value encodes "no limit".
    /// absent entries and non-finite entries collapse to that sentinel.
    pub fn rates(&self) -> Option<Vec<f64>> {
        self.input_rate_max.as_ref().map(|rates| {
            rates
                .iter()
                .map(|r| match r {
                    Some(r) if r.is_finite() => *r,
                    _ => -1.,
                })
                .collect()
        })
    }
}
