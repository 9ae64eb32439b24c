//! Unit tests for query parsing edge cases and error handling
//!
//! Tests malformed queries, edge cases, and error conditions to ensure
//! robust parsing without panics.

#[cfg(test)]
mod parser_robustness_tests {
    use navexpand::query_parser::ast::Expression;
    use navexpand::query_parser::parse_query;

    /// Test that malformed queries don't cause panics
    #[test]
    fn test_malformed_queries_no_panic() {
        let malformed_queries = vec![
            "",
            "Order.",
            "Order.Where(",
            "Order.Where(o =>",
            "Order.Where(o => o.Id ==)",
            "Order.Where((o, ) => true)",
            "Order.Select(o => new { )",
            ")Order(",
            "Order..Where(o => true)",
            "=> o",
        ];

        for query in malformed_queries {
            // Only the absence of a panic matters here.
            let _ = parse_query(query);
        }
    }

    #[test]
    fn test_incomplete_queries_rejected() {
        for query in ["Order.Where(", "Order.Where(o => o.Id ==)", "Order.Where(o => true))"] {
            assert!(parse_query(query).is_err(), "{} should not parse", query);
        }
    }

    #[test]
    fn test_whitespace_and_semicolon_tolerated() {
        let query = parse_query("  Order\n  .Where(o => o.Id == 1)\n  ;").unwrap();
        assert!(matches!(query, Expression::MethodCall(ref call) if call.method == "Where"));
    }

    #[test]
    fn test_deeply_nested_lambdas() {
        let query = "Customer.Where(c => c.Orders.Any(o => o.Customer.Orders.Any(p => p.Id == o.Id)))";
        assert!(parse_query(query).is_ok());
    }

    #[test]
    fn test_error_display_names_position() {
        let err = parse_query("Order.Where(o => o.Id == 1) extra").unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("extra"), "{}", rendered);
    }
}
