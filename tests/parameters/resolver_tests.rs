//! Tests for the ParameterResolver

use approx::assert_relative_eq;
use mufit_rs::models::Registry;
use mufit_rs::parameters::dashboard::Component;
use mufit_rs::parameters::expression::InternalValues;
use mufit_rs::parameters::{
    int2min, Dashboard, ErrorPropagation, Expression, Flag, Parameter, ParameterResolver,
};
use mufit_rs::{ErrorCategory, MuFitError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A dashboard with random flags; COMPUTED parameters reference earlier ones.
fn random_dashboard(rng: &mut ChaCha8Rng) -> Dashboard {
    let registry = Registry::builtin();
    let mut dashboard = Dashboard::from_model("blmlkg", &registry).unwrap();
    let names = dashboard.names();
    for (nint, name) in names.iter().enumerate() {
        let value = rng.gen_range(0.1..2.0);
        let roll: f64 = rng.gen();
        if nint > 0 && roll < 0.3 {
            let r = rng.gen_range(0..nint);
            let formula = format!("{:.3}*p[{}] + 0.5", rng.gen_range(0.5..2.0), r);
            dashboard.set_formula(name, &formula).unwrap();
        } else if roll < 0.5 {
            dashboard.set(name, value, Flag::Fixed).unwrap();
        } else {
            dashboard.set(name, value, Flag::Free).unwrap();
        }
    }
    dashboard
}

#[test]
fn test_slot_count_law() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..50 {
        let dashboard = random_dashboard(&mut rng);
        let fpv = int2min(&dashboard);
        assert_eq!(
            fpv.values.len() + dashboard.count_flag(Flag::Computed),
            dashboard.parameter_count()
        );
        assert_eq!(fpv.free_count, dashboard.count_flag(Flag::Free));
        assert!(fpv.nint.iter().enumerate().all(|(m, &n)| m <= n));
    }
}

#[test]
fn test_round_trip_law() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..50 {
        let mut dashboard = random_dashboard(&mut rng);
        let original = dashboard.clone();
        let resolver = ParameterResolver::resolve(&dashboard).unwrap();
        let fpv = resolver.int2min(&dashboard).unwrap();

        resolver
            .min2int(&mut dashboard, &fpv.values, &fpv.errors, ErrorPropagation::default())
            .unwrap();

        // computed values follow from the formulas over the original internal values
        let mut internal = original.values();
        for (nint, p) in original.iter() {
            if p.flag == Flag::Computed {
                let by_name = |name: &str| original.find(name);
                let expr = Expression::parse(&p.formula).unwrap().bind(&by_name).unwrap();
                internal[nint] = expr.evaluate(&InternalValues(&internal)).unwrap();
            }
        }

        for (nint, p) in dashboard.iter() {
            let before = original.parameter(nint).unwrap();
            if p.flag.has_slot() {
                assert_eq!(p.value, before.value);
                assert_eq!(p.error, before.error);
            } else {
                assert_relative_eq!(p.value, internal[nint], epsilon = 1e-12);
            }
        }
    }
}

#[test]
fn test_forward_and_self_references_are_rejected() {
    let registry = Registry::builtin();
    let template = Dashboard::from_model("blml", &registry).unwrap();
    let names = template.names();
    for (nint, name) in names.iter().enumerate() {
        for target in [nint, nint + 1] {
            let mut dashboard = template.clone();
            dashboard.set_formula(name, &format!("p[{}]", target)).unwrap();
            let err = ParameterResolver::resolve(&dashboard).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::Configuration);
            match err {
                MuFitError::Formula { name: n, formula, .. } => {
                    assert_eq!(&n, name);
                    assert_eq!(formula, format!("p[{}]", target));
                }
                other => panic!("unexpected error {:?}", other),
            }
        }
    }
}

#[test]
fn test_reference_by_later_name_is_rejected() {
    let registry = Registry::builtin();
    let mut dashboard = Dashboard::from_model("blbl", &registry).unwrap();
    dashboard.set_formula("Aa", "Ab").unwrap();
    assert!(ParameterResolver::resolve(&dashboard).is_err());
}

#[test]
fn test_scenario_x_y() {
    let mut dashboard = Dashboard::from_components(vec![
        Component::new("X", "", vec![Parameter::new("p0", 1.0)]),
        Component::new("Y", "", vec![Parameter::new("p1", 0.0).computed("0.5*p0")]),
    ])
    .unwrap();

    let resolver = ParameterResolver::resolve(&dashboard).unwrap();
    let fpv = resolver.int2min(&dashboard).unwrap();
    assert_eq!(fpv.len(), 1);
    assert_eq!(fpv.names, vec!["p0"]);
    assert_eq!(fpv.free_count, 1);

    resolver
        .min2int(&mut dashboard, &[2.0], &[0.1], ErrorPropagation::Substitution)
        .unwrap();
    assert_eq!(dashboard.get("p1").unwrap().value, 1.0);
    assert_relative_eq!(dashboard.get("p1").unwrap().error, 0.05);
}

#[test]
fn test_error_modes_agree_on_linear_formulas() {
    let mut a = Dashboard::from_components(vec![Component::new(
        "X",
        "",
        vec![
            Parameter::new("x", 1.0),
            Parameter::new("y", 2.0),
            Parameter::new("z", 0.0).computed("3*x"),
        ],
    )])
    .unwrap();
    let mut b = a.clone();
    let resolver = ParameterResolver::resolve(&a).unwrap();
    resolver
        .min2int(&mut a, &[1.0, 2.0], &[0.1, 0.2], ErrorPropagation::Substitution)
        .unwrap();
    resolver
        .min2int(&mut b, &[1.0, 2.0], &[0.1, 0.2], ErrorPropagation::Linearized)
        .unwrap();
    assert_relative_eq!(a.get("z").unwrap().error, 0.3, epsilon = 1e-9);
    assert_relative_eq!(b.get("z").unwrap().error, 0.3, epsilon = 1e-6);
}

#[test]
fn test_bindings_follow_components() {
    let registry = Registry::builtin();
    let mut dashboard = Dashboard::from_model("2blml", &registry).unwrap();
    dashboard.set_formula("λb", "e0 + e1").unwrap();
    let resolver = ParameterResolver::resolve(&dashboard).unwrap();
    let bindings = resolver.int2_int(&dashboard, &registry).unwrap();

    // externals are not a lineshape
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings[0].code, "bl");
    assert_eq!(bindings[1].keys.len(), 4);

    let x: Vec<f64> = (0..resolver.slot_count()).map(|m| m as f64).collect();
    let mut p = Vec::new();
    bindings[1].parameters_into(&x, &mut p).unwrap();
    // λb = e0 + e1 = slot 0 + slot 1
    assert_eq!(p[3], 1.0);
}

#[test]
fn test_resolver_rejects_edited_flags() {
    let registry = Registry::builtin();
    let mut dashboard = Dashboard::from_model("bl", &registry).unwrap();
    let resolver = ParameterResolver::resolve(&dashboard).unwrap();
    dashboard.set("λa", 0.3, Flag::Fixed).unwrap();
    assert!(matches!(
        resolver.int2min(&dashboard),
        Err(MuFitError::InvalidState(_))
    ));
}

#[test]
fn test_arctan_step_formula() {
    let mut dashboard = Dashboard::from_components(vec![Component::new(
        "X",
        "",
        vec![
            Parameter::new("A", 2.0),
            Parameter::new("x", 1.0),
            Parameter::new("s", 0.0).computed("p[0]*(0.5+1/pi*arctan(p[1]))"),
            Parameter::new("h", 0.0).computed("tanh(p[1]) + sinh(0) + cosh(0)"),
        ],
    )])
    .unwrap();
    let resolver = ParameterResolver::resolve(&dashboard).unwrap();
    resolver
        .min2int(&mut dashboard, &[2.0, 1.0], &[0.0, 0.0], ErrorPropagation::Linearized)
        .unwrap();
    assert_relative_eq!(dashboard.get("s").unwrap().value, 1.5, epsilon = 1e-12);
    assert_relative_eq!(dashboard.get("h").unwrap().value, 1.0f64.tanh() + 1.0, epsilon = 1e-12);
}

#[test]
fn test_bad_calls_fail_at_resolve_time() {
    for formula in ["foo(p[0])", "sqrt(p[0], p[0])", "min(p[0])"] {
        let dashboard = Dashboard::from_components(vec![Component::new(
            "X",
            "",
            vec![Parameter::new("a", 1.0), Parameter::new("b", 0.0).computed(formula)],
        )])
        .unwrap();
        let err = ParameterResolver::resolve(&dashboard).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration, "{}", formula);
        assert!(err.to_string().contains(formula), "{}", err);
    }
}

#[test]
fn test_resolver_rejects_edited_formula() {
    let mut dashboard = Dashboard::from_components(vec![Component::new(
        "X",
        "",
        vec![Parameter::new("a", 1.0), Parameter::new("c", 0.0).computed("2*p[0]")],
    )])
    .unwrap();
    let resolver = ParameterResolver::resolve(&dashboard).unwrap();
    dashboard.set_formula("c", "10*p[0]").unwrap();
    let err = resolver
        .min2int(&mut dashboard, &[1.0], &[0.0], ErrorPropagation::default())
        .unwrap_err();
    assert!(matches!(err, MuFitError::InvalidState(_)));
    assert_eq!(dashboard.get("c").unwrap().value, 0.0);
}
