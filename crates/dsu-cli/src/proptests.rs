//! Property-based tests for dsu-cli.

#![cfg(test)]

use proptest::prelude::*;

use crate::cli::CompareArgs;
use crate::console::parse_choice;
use crate::output::{OutputFormat, OutputFormatter};
use crate::ExitCode;

proptest! {
    #[test]
    fn prop_choice_in_range_selects_button(count in 1usize..10, pick in 0usize..10) {
        let pick = pick % count;
        prop_assert_eq!(parse_choice(&(pick + 1).to_string(), count), Some(pick));
    }

    #[test]
    fn prop_choice_out_of_range_rejected(count in 0usize..10, extra in 1usize..100) {
        prop_assert_eq!(parse_choice(&(count + extra).to_string(), count), None);
    }

    #[test]
    fn prop_compare_exit_code_follows_precedence(
        a in (0u64..4, 0u64..4, 0u64..4),
        b in (0u64..4, 0u64..4, 0u64..4),
    ) {
        let current = format!("{}.{}.{}", a.0, a.1, a.2);
        let candidate = format!("{}.{}.{}", b.0, b.1, b.2);
        let output = OutputFormatter::new(OutputFormat::Quiet, false);

        let code = CompareArgs { current, candidate }.execute(&output).unwrap();
        let expected = if b > a { ExitCode::Success } else { ExitCode::NoUpdate };
        prop_assert_eq!(code, expected);
    }
}
