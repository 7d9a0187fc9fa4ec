//! Initial work for one of the two stages.

use pendulum_model::{ConcreteTestResult, SymbolicExplorationRequest, TestCase};
use pendulum_replay::ReplayBackend;
use tracing::info;

use crate::config::Target;
use crate::error::SetupError;

/// Which stage starts the loop, and with what.
#[derive(Debug, Clone)]
pub enum Seed {
    /// A supplied test, replayed first.
    Exploration(Vec<ConcreteTestResult>),
    /// Entry states of the target methods, generated first.
    Generation(Vec<SymbolicExplorationRequest>),
}

impl Seed {
    /// Build the seed for `target`. A method target with an initial test
    /// starts from exploration; anything else starts from generation.
    pub fn plan<B: ReplayBackend>(
        backend: &B,
        target: &Target,
        initial_test: Option<TestCase>,
    ) -> Result<Self, SetupError> {
        let seed = match (target, initial_test) {
            (Target::Method(method), Some(test)) => {
                if !backend.has_method(method) {
                    return Err(SetupError::UnknownTarget(method.to_string()));
                }
                Seed::Exploration(vec![ConcreteTestResult {
                    target: method.clone(),
                    test_case: test,
                    depth: 0,
                }])
            }
            (Target::Method(method), None) => {
                if !backend.has_method(method) {
                    return Err(SetupError::UnknownTarget(method.to_string()));
                }
                let entry = backend.entry_state(method)?;
                Seed::Generation(vec![SymbolicExplorationRequest::seed(method.clone(), entry)])
            }
            (Target::Class(class), _) => {
                let methods = backend.methods_of(class);
                if methods.is_empty() {
                    return Err(SetupError::UnknownTarget(class.clone()));
                }
                let requests = methods
                    .into_iter()
                    .map(|m| {
                        let entry = backend.entry_state(&m)?;
                        Ok(SymbolicExplorationRequest::seed(m, entry))
                    })
                    .collect::<Result<Vec<_>, SetupError>>()?;
                Seed::Generation(requests)
            }
        };
        info!(stage = "main", %target, items = seed.len(), from_test = seed.starts_with_test(), "seed planned");
        Ok(seed)
    }

    pub fn len(&self) -> usize {
        match self {
            Seed::Exploration(items) => items.len(),
            Seed::Generation(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn starts_with_test(&self) -> bool {
        matches!(self, Seed::Exploration(_))
    }

    /// First artifact id free for generation; id 0 belongs to a supplied test.
    pub fn first_free_id(&self) -> u64 {
        if self.starts_with_test() {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pendulum_model::{CmpOp, MethodSignature};
    use pendulum_replay::program::{InputTable, MethodBody, Op, Operand, Program, ProgramBackend};

    fn backend() -> ProgramBackend {
        let sig = MethodSignature::new("demo/K", "(I)I", "sign");
        let abs = MethodSignature::new("demo/K", "(I)I", "abs");
        let clinit = MethodSignature::new("demo/K", "()V", "<clinit>");
        let body = |s: &MethodSignature| {
            MethodBody::new(
                s.clone(),
                1,
                vec![
                    Op::If {
                        lhs: Operand::Param(0),
                        op: CmpOp::Lt,
                        rhs: Operand::Const(0),
                        target: 2,
                    },
                    Op::Return,
                    Op::Return,
                ],
            )
        };
        let program = Program::new()
            .with_method(body(&sig))
            .with_method(body(&abs))
            .with_method(MethodBody::new(clinit, 0, vec![Op::Return]));
        ProgramBackend::new(program, InputTable::default())
    }

    #[test]
    fn test_method_with_initial_test_seeds_exploration() {
        let target = Target::Method(MethodSignature::new("demo/K", "(I)I", "sign"));
        let test = TestCase::new("demo/KTest", "()V", "test0");
        let seed = Seed::plan(&backend(), &target, Some(test.clone())).unwrap();
        let Seed::Exploration(items) = &seed else {
            panic!("expected exploration seed");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].test_case, test);
        assert_eq!(items[0].depth, 0);
        assert_eq!(seed.first_free_id(), 1);
    }

    #[test]
    fn test_method_without_test_seeds_generation() {
        let target = Target::Method(MethodSignature::new("demo/K", "(I)I", "sign"));
        let seed = Seed::plan(&backend(), &target, None).unwrap();
        let Seed::Generation(items) = &seed else {
            panic!("expected generation seed");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].depth, -1);
        assert!(!items[0].is_frontier);
        assert_eq!(items[0].current_state, items[0].initial_state);
        assert!(items[0].current_state.path_condition.is_empty());
        assert_eq!(seed.first_free_id(), 0);
    }

    #[test]
    fn test_class_target_seeds_visible_methods() {
        let seed = Seed::plan(&backend(), &Target::Class("demo/K".into()), None).unwrap();
        assert_eq!(seed.len(), 2);
        assert!(!seed.starts_with_test());
    }

    #[test]
    fn test_unknown_targets() {
        let missing = Target::Method(MethodSignature::new("demo/K", "()V", "nope"));
        assert!(matches!(
            Seed::plan(&backend(), &missing, None),
            Err(SetupError::UnknownTarget(_))
        ));
        assert!(matches!(
            Seed::plan(&backend(), &Target::Class("demo/Other".into()), None),
            Err(SetupError::UnknownTarget(_))
        ));
    }
}
