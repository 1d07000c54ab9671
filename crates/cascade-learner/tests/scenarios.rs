//! End-to-end scenarios driving the stack through the text parser.

use cascade_core::hashing::HashFamily;
use cascade_core::{Label, LabelType, Prediction};
use cascade_data::TextParser;
use cascade_learner::{build_stack, Algorithm, BuiltStack, Learner, StackOptions};

fn parser_for(stack: &BuiltStack) -> TextParser {
    let opts = &stack.workspace.opts;
    TextParser::new(opts.hash, opts.label_type(), opts.noconstant, opts.audit)
}

fn feed(stack: &mut BuiltStack, parser: &mut TextParser, line: &str) -> f32 {
    let mut ex = cascade_core::Example::new();
    parser.parse_line(line, &mut ex);
    if ex.is_test() {
        stack.top.predict(&mut stack.workspace, &mut ex);
    } else {
        stack.top.learn(&mut stack.workspace, &mut ex);
    }
    stack.top.finish_example(&mut stack.workspace, &mut ex);
    ex.pred.as_scalar().unwrap_or(0.0)
}

/// Plain GD on the classic alternating pair: the held-out prediction settles
/// on +1, and its magnitude stops shrinking once the transient dies out.
#[test]
fn test_plain_gd_alternating_pair() {
    let opts = StackOptions {
        learning_rate: 0.5,
        power_t: 0.0,
        num_bits: 18,
        hash: HashFamily::AllBytes,
        ..StackOptions::default()
    };
    let mut stack = build_stack(opts).unwrap();
    let mut parser = parser_for(&stack);

    let mut held_out = Vec::new();
    for _ in 0..100 {
        feed(&mut stack, &mut parser, "1 | a:1 b:1");
        feed(&mut stack, &mut parser, "-1 | a:1 b:-1");
        held_out.push(feed(&mut stack, &mut parser, "| a:1 b:1"));
    }

    let last = *held_out.last().unwrap();
    assert!(last > 0.0, "held-out prediction sign: {last}");
    assert!((last - 1.0).abs() < 1e-2, "held-out prediction: {last}");
    // Past the early transient the magnitude is non-decreasing up to the
    // residual oscillation of the pairwise updates.
    for round in 10..held_out.len() - 1 {
        assert!(
            held_out[round + 1].abs() >= held_out[round].abs() - 1e-3,
            "|prediction| shrank at round {round}: {} -> {}",
            held_out[round],
            held_out[round + 1]
        );
    }
}

/// Test examples must not move weights: interleaving unlabeled lines leaves
/// the learned trajectory bit-identical.
#[test]
fn test_unlabeled_lines_do_not_update() {
    let opts = StackOptions {
        learning_rate: 0.5,
        power_t: 0.0,
        num_bits: 14,
        hash: HashFamily::AllBytes,
        ..StackOptions::default()
    };
    let mut plain = build_stack(opts.clone()).unwrap();
    let mut interleaved = build_stack(opts).unwrap();
    let mut p1 = parser_for(&plain);
    let mut p2 = parser_for(&interleaved);

    for _ in 0..20 {
        feed(&mut plain, &mut p1, "1 | a:1");
        feed(&mut interleaved, &mut p2, "1 | a:1");
        feed(&mut interleaved, &mut p2, "| a:1 b:3");
    }
    let a = feed(&mut plain, &mut p1, "| a:1");
    let b = feed(&mut interleaved, &mut p2, "| a:1");
    assert_eq!(a.to_bits(), b.to_bits());
}

/// The same pair is separable for every base algorithm.
#[test]
fn test_all_algorithms_learn_the_sign() {
    for algorithm in [
        Algorithm::Sgd {
            adaptive: true,
            normalized: true,
        },
        Algorithm::Ftrl {
            alpha: 0.5,
            beta: 1.0,
        },
        Algorithm::OjaNewton {
            sketch: 5,
            threshold: 1e7,
        },
        Algorithm::RpNewton {
            sketch: 5,
            epoch: 8,
        },
    ] {
        let opts = StackOptions {
            learning_rate: 0.5,
            power_t: 0.0,
            num_bits: 16,
            algorithm,
            hash: HashFamily::AllBytes,
            ..StackOptions::default()
        };
        let mut stack = build_stack(opts).unwrap();
        let mut parser = parser_for(&stack);
        for _ in 0..200 {
            feed(&mut stack, &mut parser, "1 | a:1 b:1");
            feed(&mut stack, &mut parser, "-1 | a:1 b:-1");
        }
        let p = feed(&mut stack, &mut parser, "| a:1 b:1");
        assert!(
            p > 0.0 && p.is_finite(),
            "{algorithm:?}: held-out prediction {p}"
        );
    }
}

/// One-against-all over text-format multiclass labels, quadratic features
/// included.
#[test]
fn test_oaa_with_interactions() {
    let opts = StackOptions {
        learning_rate: 0.5,
        power_t: 0.0,
        num_bits: 16,
        oaa: Some(3),
        interactions: vec!["xy".to_string()],
        hash: HashFamily::AllBytes,
        ..StackOptions::default()
    };
    let mut stack = build_stack(opts).unwrap();
    let mut parser = parser_for(&stack);
    assert_eq!(stack.workspace.opts.label_type(), LabelType::Multiclass);

    let lines = [
        "1 |x one |y alpha",
        "2 |x two |y alpha",
        "3 |x one |y beta",
    ];
    for _ in 0..30 {
        for line in lines {
            let mut ex = cascade_core::Example::new();
            parser.parse_line(line, &mut ex);
            stack.top.learn(&mut stack.workspace, &mut ex);
            stack.top.finish_example(&mut stack.workspace, &mut ex);
        }
    }
    for (class, line) in [(1u32, lines[0]), (2, lines[1]), (3, lines[2])] {
        let mut ex = cascade_core::Example::new();
        parser.parse_line(line, &mut ex);
        ex.label = Label::None;
        stack.top.predict(&mut stack.workspace, &mut ex);
        assert_eq!(ex.pred, Prediction::Multiclass(class), "line {line}");
    }
}

/// A malformed label line degrades to test-only instead of corrupting
/// weights or aborting.
#[test]
fn test_malformed_label_recovery_leaves_weights_alone() {
    let opts = StackOptions {
        learning_rate: 0.5,
        power_t: 0.0,
        num_bits: 14,
        hash: HashFamily::AllBytes,
        ..StackOptions::default()
    };
    let mut clean = build_stack(opts.clone()).unwrap();
    let mut dirty = build_stack(opts).unwrap();
    let mut p1 = parser_for(&clean);
    let mut p2 = parser_for(&dirty);

    for _ in 0..10 {
        feed(&mut clean, &mut p1, "1 | a:1");
        feed(&mut dirty, &mut p2, "1 | a:1");
        feed(&mut dirty, &mut p2, "garbage-label | a:5");
    }
    let a = feed(&mut clean, &mut p1, "| a:1");
    let b = feed(&mut dirty, &mut p2, "| a:1");
    assert_eq!(a.to_bits(), b.to_bits());
}
