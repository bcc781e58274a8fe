use super::{LayerOps, check_input};
use crate::bindings::Bindings;
use crate::expr::{VectorExpr, selection_matrix};
use crate::geometry::PoolGeometry;
use crate::linalg::{Matrix, Vector};
use crate::model::Variable;
use crate::{Error, Result};

/// Per-tile maximum over every channel. Parameter-free.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxPool {
    geometry: PoolGeometry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaxPoolCache {
    /// Input index of the maximum of each tile, in output order.
    pub(crate) sources: Vec<usize>,
    pub(crate) output: Vector,
    selection: Option<Matrix>,
}

impl MaxPool {
    pub fn new(geometry: PoolGeometry) -> Self {
        Self { geometry }
    }

    #[inline]
    pub fn geometry(&self) -> PoolGeometry {
        self.geometry
    }
}

impl LayerOps for MaxPool {
    type Cache = MaxPoolCache;

    #[inline]
    fn input_len(&self) -> usize {
        self.geometry.input_len()
    }

    #[inline]
    fn output_len(&self) -> usize {
        self.geometry.output_len()
    }

    fn variables(&self) -> Vec<Variable> {
        Vec::new()
    }

    fn contains_variable(&self, _variable: Variable) -> bool {
        false
    }

    fn evaluate(&self, input: &Vector, _bindings: &Bindings) -> Result<(Vector, Self::Cache)> {
        check_input("max-pool", self.input_len(), input)?;
        let sources = self.geometry.argmax(input.as_slice());
        let output: Vector = sources.iter().map(|&i| input[i]).collect();
        Ok((
            output.clone(),
            MaxPoolCache {
                sources,
                output,
                selection: None,
            },
        ))
    }

    /// The 0/1 selection matrix: row `k` has its single 1 at the source of output `k`.
    fn derivative_wrt_input(
        &self,
        _input: &Vector,
        cache: &mut Self::Cache,
        _bindings: &Bindings,
    ) -> Result<Matrix> {
        let input_len = self.input_len();
        let sources = &cache.sources;
        Ok(cache
            .selection
            .get_or_insert_with(|| selection_matrix(sources, input_len))
            .clone())
    }

    fn derivative_wrt_parameter(
        &self,
        _input: &Vector,
        variable: Variable,
        _cache: &mut Self::Cache,
        _bindings: &Bindings,
    ) -> Result<Vector> {
        Err(Error::Unsupported(format!(
            "max-pool layers have no parameters, asked for {variable}"
        )))
    }

    #[inline]
    fn evaluation<'a>(&self, cache: &'a Self::Cache) -> &'a Vector {
        &cache.output
    }

    fn expression(&self, input: VectorExpr) -> Result<VectorExpr> {
        VectorExpr::max_pool(input, self.geometry)
    }
}
