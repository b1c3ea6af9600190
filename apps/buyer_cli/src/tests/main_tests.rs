use std::str::FromStr;

use clap::Parser;
use rust_decimal::Decimal;

use super::{check_total_override, Args, Command};

#[test]
fn total_override_must_be_positive() {
    assert!(check_total_override(None).is_ok());
    assert!(check_total_override(Some(Decimal::from_str("120.50").expect("decimal"))).is_ok());
    assert!(check_total_override(Some(Decimal::ZERO)).is_err());
    assert!(check_total_override(Some(Decimal::from(-5))).is_err());
}

#[test]
fn checkout_parses_total_as_decimal() {
    let args = Args::try_parse_from([
        "buyer", "checkout", "--name", "Asha", "--address", "12 Market Rd", "--phone",
        "9876543210", "--total", "99.90",
    ])
    .expect("args");

    match args.command {
        Command::Checkout { total, name, .. } => {
            assert_eq!(name, "Asha");
            assert_eq!(total, Some(Decimal::new(9990, 2)));
        }
        other => panic!("unexpected command {other:?}"),
    }
}
