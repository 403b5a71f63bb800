use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{GradientsParams, Optimizer as BurnOptimizer, SimpleOptimizer};
use burn::tensor::backend::AutodiffBackend;
use crate::optimizer::Optimizer;

/// One of burn's per-tensor update rules applied to a whole registration model
/// at a fixed step size. The rule's state starts empty, so one value serves a
/// single scale.
pub struct StepRule<O, M, B>
where
    O: SimpleOptimizer<B::InnerBackend>,
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    rule: OptimizerAdaptor<O, M, B>,
    learning_rate: f64,
    name: &'static str,
}

impl<O, M, B> StepRule<O, M, B>
where
    O: SimpleOptimizer<B::InnerBackend>,
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    pub fn new(name: &'static str, rule: OptimizerAdaptor<O, M, B>, learning_rate: f64) -> Self {
        Self { rule, learning_rate, name }
    }
}

impl<O, M, B> Optimizer<M, B> for StepRule<O, M, B>
where
    O: SimpleOptimizer<B::InnerBackend>,
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    fn step(&mut self, module: M, gradients: GradientsParams) -> M {
        self.rule.step(self.learning_rate, module, gradients)
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
