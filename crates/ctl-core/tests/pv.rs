use ctl_core::{Comparator, InMemoryPvStore, PvClient, PvError, PvValue};

#[test]
fn comparator_mixes_ints_and_floats() {
    assert!(Comparator::Ge.evaluate(&PvValue::Int(3), &PvValue::Float(2.5)));
    assert!(Comparator::Lt.evaluate(&PvValue::Float(1.0), &PvValue::Int(2)));
    assert!(Comparator::Eq.evaluate(&PvValue::Int(4), &PvValue::Float(4.0)));
}

#[test]
fn incomparable_values_only_satisfy_not_equal() {
    let text = PvValue::from("open");
    let number = PvValue::Int(1);
    assert!(Comparator::Ne.evaluate(&text, &number));
    assert!(!Comparator::Eq.evaluate(&text, &number));
    assert!(!Comparator::Gt.evaluate(&text, &number));
}

#[test]
fn checked_add_keeps_integers_integral() {
    assert_eq!(
        PvValue::Int(90).checked_add(&PvValue::Int(10)),
        Some(PvValue::Int(100))
    );
    assert_eq!(
        PvValue::Int(1).checked_add(&PvValue::Float(0.5)),
        Some(PvValue::Float(1.5))
    );
    assert_eq!(PvValue::from("x").checked_add(&PvValue::Int(1)), None);
}

#[test]
fn store_reports_unknown_and_unreachable_pvs() {
    let store = InMemoryPvStore::with_values([("MAGNET:CURRENT", 0i64)]);
    assert_eq!(store.read("MAGNET:CURRENT"), Ok(PvValue::Int(0)));
    assert_eq!(
        store.read("MISSING"),
        Err(PvError::Unknown("MISSING".to_string()))
    );

    store.set_unreachable("MAGNET:CURRENT", true);
    assert_eq!(
        store.write("MAGNET:CURRENT", PvValue::Int(5)),
        Err(PvError::Unreachable("MAGNET:CURRENT".to_string()))
    );

    store.set_unreachable("MAGNET:CURRENT", false);
    store.write("MAGNET:CURRENT", PvValue::Int(5)).unwrap();
    assert_eq!(store.get("MAGNET:CURRENT"), Some(PvValue::Int(5)));
}
