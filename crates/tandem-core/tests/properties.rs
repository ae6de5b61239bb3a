//! Property-based tests for the command protocol, patch router and host.
//!
//! Covers the wire round trip, identifier rejection, graph acyclicity under
//! arbitrary `connect` sequences, and lockstep convergence of two hosts fed
//! the same commands at different buffer boundaries.

use std::collections::VecDeque;

use proptest::prelude::*;
use tandem_core::{
    COMMAND_SIZE, Command, CommandError, ModuleHost, ModuleRegistry, Op, PatchError, PatchRouter,
    PatchSpec, ValueType, modules::Gain, pack, unpack,
};

/// Valid identifiers: 1-16 ASCII graphic characters.
fn ident() -> impl Strategy<Value = String> {
    "[!-~]{1,16}"
}

/// `(op, value_type, value)` combinations the protocol admits.
fn payload() -> impl Strategy<Value = (Op, ValueType, f64)> {
    prop_oneof![
        (-1.0e9f64..1.0e9f64).prop_map(|v| (Op::Set, ValueType::Float, v)),
        any::<bool>().prop_map(|b| (Op::Set, ValueType::Bool, if b { 1.0 } else { 0.0 })),
        any::<bool>().prop_map(|b| (Op::Gate, ValueType::Bool, if b { 1.0 } else { 0.0 })),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// `unpack(pack(x)) == x` for every valid tuple.
    #[test]
    fn pack_unpack_round_trip(
        module in ident(),
        param in ident(),
        (op, value_type, value) in payload(),
    ) {
        let record = pack(op, value_type, &module, &param, value).unwrap();
        prop_assert_eq!(record.len(), COMMAND_SIZE);
        let cmd = unpack(&record).unwrap();
        prop_assert_eq!(cmd.op, op);
        prop_assert_eq!(cmd.value_type, value_type);
        prop_assert!(cmd.module_id.matches(&module));
        prop_assert!(cmd.param_id.matches(&param));
        prop_assert_eq!(cmd.value.to_bits(), value.to_bits());
    }

    /// Over-length identifiers never encode.
    #[test]
    fn over_length_identifier_rejected(long in "[a-z]{17,40}", ok in ident()) {
        let err = pack(Op::Set, ValueType::Float, &long, &ok, 1.0).unwrap_err();
        let is_invalid_identifier = matches!(err, CommandError::InvalidIdentifier { .. });
        prop_assert!(is_invalid_identifier);
        let err = pack(Op::Set, ValueType::Float, &ok, &long, 1.0).unwrap_err();
        let is_invalid_identifier = matches!(err, CommandError::InvalidIdentifier { .. });
        prop_assert!(is_invalid_identifier);
    }

    /// Identifiers with non-ASCII characters never encode.
    #[test]
    fn non_ascii_identifier_rejected(
        prefix in "[a-z]{0,5}",
        bad in "[\u{80}-\u{2fff}]",
        suffix in "[a-z]{0,5}",
        ok in ident(),
    ) {
        let id = format!("{prefix}{bad}{suffix}");
        let err = pack(Op::Set, ValueType::Float, &id, &ok, 1.0).unwrap_err();
        let is_invalid_identifier = matches!(err, CommandError::InvalidIdentifier { .. });
        prop_assert!(is_invalid_identifier);
        let err = Command::set(&ok, &id, 1.0).unwrap_err();
        let is_invalid_identifier = matches!(err, CommandError::InvalidIdentifier { .. });
        prop_assert!(is_invalid_identifier);
    }

    /// Any `connect` sequence leaves an acyclic graph, and a rejected call
    /// leaves the graph exactly as it was.
    #[test]
    fn router_stays_acyclic(edges in prop::collection::vec((0usize..6, 0usize..6), 0..40)) {
        let mut router = PatchRouter::new(48000.0, 16);
        let names = ["a", "b", "c", "d", "e", "f"];
        for name in names {
            router.add_module(name, Box::new(Gain::new(48000.0))).unwrap();
            router.set_generator(name, true).unwrap();
        }
        for (from, to) in edges {
            let before = router.edge_count();
            match router.connect(names[from], names[to]) {
                Ok(_) => prop_assert_eq!(router.edge_count(), before + 1),
                Err(PatchError::CycleDetected { .. } | PatchError::DuplicateEdge { .. }) => {
                    prop_assert_eq!(router.edge_count(), before);
                }
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
            prop_assert!(router.validate().is_ok());
        }
    }

    /// Two hosts that receive the same commands, even on different buffer
    /// boundaries, hold identical parameter state once smoothing settles.
    #[test]
    fn hosts_converge_in_lockstep(
        sets in prop::collection::vec(
            (prop_oneof![Just(("osc1", "freq")), Just(("osc1", "amp")), Just(("filt1", "cutoff")), Just(("env1", "sustain"))],
             0.0f64..20000.0,
             any::<bool>()),
            1..20),
        lag in 0usize..6,
    ) {
        let registry = ModuleRegistry::new();
        let spec = PatchSpec::default_voice();
        let mut primary = ModuleHost::from_spec(&spec, &registry, 48000.0, 64).unwrap();
        let mut standby = ModuleHost::from_spec(&spec, &registry, 48000.0, 64).unwrap();

        let records: VecDeque<[u8; COMMAND_SIZE]> = sets
            .iter()
            .map(|&((module, param), value, immediate)| {
                Command::set(module, param, value).unwrap().with_immediate(immediate).encode().unwrap()
            })
            .collect();
        let mut primary_queue = records.clone();
        let mut standby_queue = records;
        let mut empty = VecDeque::new();
        let mut out = vec![0.0f32; 64];

        primary.tick(&mut primary_queue, &mut out);
        for _ in 0..lag {
            standby.tick(&mut empty, &mut out);
        }
        standby.tick(&mut standby_queue, &mut out);
        for _ in 0..1000 {
            primary.process(&mut out);
            standby.process(&mut out);
        }

        let mut a = Vec::new();
        primary.for_each_param(|m, p, cur, tgt| a.push((*m, *p, cur.to_bits(), tgt.to_bits())));
        let mut b = Vec::new();
        standby.for_each_param(|m, p, cur, tgt| b.push((*m, *p, cur.to_bits(), tgt.to_bits())));
        prop_assert_eq!(a, b);
    }
}
