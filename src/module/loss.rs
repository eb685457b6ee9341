/// Loss container returned by a module's loss stage
///
/// Four categories (total loss, reconstruction, local KL, global KL), each a
/// set of named terms summed on read. Terms are plain scalars or tensors
/// (typically one value per cell).
use std::collections::BTreeMap;

use candle_core::{DType, Device, Tensor};

/// One loss value
#[derive(Debug, Clone)]
pub enum LossTerm {
    Scalar(f64),
    Tensor(Tensor),
}

impl From<f64> for LossTerm {
    fn from(v: f64) -> Self {
        LossTerm::Scalar(v)
    }
}

impl From<Tensor> for LossTerm {
    fn from(t: Tensor) -> Self {
        LossTerm::Tensor(t)
    }
}

impl LossTerm {
    /// Elementwise sum; tensor shapes broadcast, mismatches surface as Candle errors
    pub fn add(&self, other: &LossTerm) -> crate::Result<LossTerm> {
        let sum = match (self, other) {
            (LossTerm::Scalar(a), LossTerm::Scalar(b)) => LossTerm::Scalar(a + b),
            (LossTerm::Scalar(s), LossTerm::Tensor(t)) | (LossTerm::Tensor(t), LossTerm::Scalar(s)) => {
                LossTerm::Tensor(t.affine(1.0, *s)?)
            }
            (LossTerm::Tensor(a), LossTerm::Tensor(b)) => LossTerm::Tensor(a.broadcast_add(b)?),
        };
        Ok(sum)
    }

    /// Scalar value, if this term is a plain scalar
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            LossTerm::Scalar(v) => Some(*v),
            LossTerm::Tensor(_) => None,
        }
    }

    /// Sum over every element
    pub fn sum_f64(&self) -> crate::Result<f64> {
        match self {
            LossTerm::Scalar(v) => Ok(*v),
            LossTerm::Tensor(t) => Ok(t.to_dtype(DType::F64)?.sum_all()?.to_scalar::<f64>()?),
        }
    }

    /// Tensor form, e.g. for a backward pass
    pub fn to_tensor(&self, device: &Device) -> crate::Result<Tensor> {
        match self {
            LossTerm::Scalar(v) => Ok(Tensor::new(*v, device)?),
            LossTerm::Tensor(t) => Ok(t.clone()),
        }
    }
}

/// A bare value or an already-named set of terms
#[derive(Debug, Clone)]
pub enum LossInput {
    Term(LossTerm),
    Named(BTreeMap<String, LossTerm>),
}

impl LossInput {
    /// Named terms from `(name, value)` pairs
    pub fn named<K, V>(terms: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<LossTerm>,
    {
        LossInput::Named(terms.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Normalize to named terms, filing a bare value under `default_name`
    fn into_terms(self, default_name: &str) -> BTreeMap<String, LossTerm> {
        match self {
            LossInput::Term(term) => BTreeMap::from([(default_name.to_string(), term)]),
            LossInput::Named(terms) => terms,
        }
    }
}

impl From<f64> for LossInput {
    fn from(v: f64) -> Self {
        LossInput::Term(LossTerm::Scalar(v))
    }
}

impl From<Tensor> for LossInput {
    fn from(t: Tensor) -> Self {
        LossInput::Term(LossTerm::Tensor(t))
    }
}

impl From<LossTerm> for LossInput {
    fn from(term: LossTerm) -> Self {
        LossInput::Term(term)
    }
}

impl From<BTreeMap<String, LossTerm>> for LossInput {
    fn from(terms: BTreeMap<String, LossTerm>) -> Self {
        LossInput::Named(terms)
    }
}

impl From<BTreeMap<String, Tensor>> for LossInput {
    fn from(terms: BTreeMap<String, Tensor>) -> Self {
        LossInput::named(terms)
    }
}

/// Losses of one forward pass
#[derive(Debug, Clone)]
pub struct ScviLoss {
    loss: BTreeMap<String, LossTerm>,
    reconstruction_loss: BTreeMap<String, LossTerm>,
    kl_local: BTreeMap<String, LossTerm>,
    kl_global: BTreeMap<String, LossTerm>,
    elbo: Option<LossTerm>,
}

impl ScviLoss {
    /// Build from four bare values or named term sets
    ///
    /// Shapes are not checked here; incompatible terms fail when summed.
    pub fn new(
        loss: impl Into<LossInput>,
        reconstruction_loss: impl Into<LossInput>,
        kl_local: impl Into<LossInput>,
        kl_global: impl Into<LossInput>,
    ) -> Self {
        Self {
            loss: loss.into().into_terms("loss"),
            reconstruction_loss: reconstruction_loss.into().into_terms("reconstruction_loss"),
            kl_local: kl_local.into().into_terms("kl_local"),
            kl_global: kl_global.into().into_terms("kl_global"),
            elbo: None,
        }
    }

    /// Attach a model-specific ELBO
    pub fn with_elbo(mut self, elbo: impl Into<LossTerm>) -> Self {
        self.elbo = Some(elbo.into());
        self
    }

    fn sum_terms(terms: &BTreeMap<String, LossTerm>) -> crate::Result<LossTerm> {
        terms
            .values()
            .try_fold(LossTerm::Scalar(0.0), |acc, term| acc.add(term))
    }

    pub fn loss(&self) -> crate::Result<LossTerm> {
        Self::sum_terms(&self.loss)
    }

    pub fn reconstruction_loss(&self) -> crate::Result<LossTerm> {
        Self::sum_terms(&self.reconstruction_loss)
    }

    pub fn kl_local(&self) -> crate::Result<LossTerm> {
        Self::sum_terms(&self.kl_local)
    }

    pub fn kl_global(&self) -> crate::Result<LossTerm> {
        Self::sum_terms(&self.kl_global)
    }

    /// Unset unless the module attached one with [`ScviLoss::with_elbo`]
    pub fn elbo(&self) -> Option<&LossTerm> {
        self.elbo.as_ref()
    }

    pub fn loss_terms(&self) -> &BTreeMap<String, LossTerm> {
        &self.loss
    }

    pub fn reconstruction_loss_terms(&self) -> &BTreeMap<String, LossTerm> {
        &self.reconstruction_loss
    }

    pub fn kl_local_terms(&self) -> &BTreeMap<String, LossTerm> {
        &self.kl_local
    }

    pub fn kl_global_terms(&self) -> &BTreeMap<String, LossTerm> {
        &self.kl_global
    }
}
