use proptest::prelude::*;

use pipeguard::engine::BeginOutcome;
use pipeguard_test_utils::builders::{Harness, upload};
use pipeguard_test_utils::stages::{ExecutionLog, succeeding_stages};

#[derive(Debug, Clone)]
enum Op {
    /// Submit a batch; `routable` decides whether any file can be stored.
    Submit { routable: bool },
    /// The worker picks up the trigger (if any) and finishes the run.
    FinishRun,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<bool>().prop_map(|routable| Op::Submit { routable }),
        1 => Just(Op::FinishRun),
    ]
}

proptest! {
    // Between two marker clears, at most one submission is accepted, and the
    // marker exists exactly when an accepted submission is still pending.
    #[test]
    fn at_most_one_acceptance_between_clears(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let h = Harness::new();
        let gate = h.gate();
        let orch = h.orchestrator(succeeding_stages(&ExecutionLog::new()));
        let mut accepted_since_clear = 0usize;

        for op in ops {
            match op {
                Op::Submit { routable } => {
                    let name = if routable { "Sales Transaction List.csv" } else { "misc.csv" };
                    if gate.submit(vec![upload(name)]).is_ok() {
                        accepted_since_clear += 1;
                    }
                }
                Op::FinishRun => {
                    if let BeginOutcome::Started(run) = orch.try_begin().unwrap() {
                        drop(run);
                        accepted_since_clear = 0;
                    }
                }
            }
            prop_assert!(accepted_since_clear <= 1);
            prop_assert_eq!(h.marker_present(), accepted_since_clear == 1);
            prop_assert_eq!(h.trigger_present(), accepted_since_clear == 1);
        }
    }
}
