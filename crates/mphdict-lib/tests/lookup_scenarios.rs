//! End-to-end reverse-lookup scenarios

use mphdict_lib::{BuildOptions, LookupDictionary, ValidationMode};

fn cities() -> Vec<(String, Vec<String>)> {
    [
        ("China", vec!["Beijing", "Shanghai", "Guangzhou"]),
        ("USA", vec!["New York", "Los Angeles", "Chicago"]),
        ("Japan", vec!["Tokyo", "Osaka", "Kyoto"]),
    ]
    .into_iter()
    .map(|(k, vs)| (k.to_string(), vs.into_iter().map(str::to_string).collect()))
    .collect()
}

fn shared() -> Vec<(String, Vec<String>)> {
    [
        ("A", vec!["Common"]),
        ("B", vec!["Common", "UniqueB"]),
        ("C", vec!["UniqueC", "Common"]),
    ]
    .into_iter()
    .map(|(k, vs)| (k.to_string(), vs.into_iter().map(str::to_string).collect()))
    .collect()
}

#[test]
fn test_city_lookup() {
    let dict = LookupDictionary::build(&cities()).unwrap();
    assert_eq!(dict.keys(), &["China", "USA", "Japan"]);
    assert_eq!(dict.num_values(), 9);

    assert_eq!(dict.query("Beijing"), Some("China"));
    assert_eq!(dict.query("Osaka"), Some("Japan"));
    assert_eq!(dict.query("Chicago"), Some("USA"));
    assert_eq!(dict.query_all("Beijing"), Some(vec!["China"]));

    // Not a value; the 8-bit validation layer rejects it (the build is
    // deterministic, so these probes are stable).
    assert_eq!(dict.query("London"), None);
    // A key is not a value either.
    assert_eq!(dict.query_all("China"), None);
}

#[test]
fn test_city_lookup_roundtrip() {
    let dict = LookupDictionary::build(&cities()).unwrap();
    assert!(dict.uses_direct_mode());

    for decoded in [
        LookupDictionary::from_bytes(&dict.to_bytes()).unwrap(),
        LookupDictionary::from_compressed(&dict.to_compressed_bytes()).unwrap(),
    ] {
        assert_eq!(decoded.keys(), dict.keys());
        for city in ["Beijing", "Shanghai", "Guangzhou", "Tokyo", "Osaka", "Kyoto", "London"] {
            assert_eq!(decoded.query(city), dict.query(city), "query({city})");
            assert_eq!(decoded.query_all(city), dict.query_all(city));
        }
    }
}

#[test]
fn test_many_to_one_values() {
    let dict = LookupDictionary::build(&shared()).unwrap();
    // A third of the values are shared, so the sparse representation is
    // chosen and query_all reads the inverted index.
    assert!(!dict.uses_direct_mode());

    let mut owners = dict.query_all("Common").unwrap();
    owners.sort_unstable();
    assert_eq!(owners, vec!["A", "B", "C"]);
    assert_eq!(dict.query_all("UniqueB"), Some(vec!["B"]));
    assert_eq!(dict.query_all("UniqueC"), Some(vec!["C"]));
    // query returns the first owner in key order.
    assert_eq!(dict.query("Common"), Some("A"));
}

#[test]
fn test_many_to_one_roundtrip() {
    let dict = LookupDictionary::build(&shared()).unwrap();
    let decoded = LookupDictionary::from_bytes(&dict.to_bytes()).unwrap();
    assert!(!decoded.uses_direct_mode());
    for value in ["Common", "UniqueB", "UniqueC"] {
        assert_eq!(decoded.query_all(value), dict.query_all(value));
    }
}

#[test]
fn test_query_all_matches_ownership_exactly() {
    // Larger alias-style map: every value's owner set must round-trip
    // through build, query_all, and the serialized form.
    let mut map: Vec<(String, Vec<String>)> = (0..40)
        .map(|k| {
            let values = (0..8).map(|v| format!("glyph-{k:02}-{v}")).collect();
            (format!("font-{k:02}"), values)
        })
        .collect();
    // A handful of values shared by several keys (under the 10% cutoff).
    for k in [0usize, 7, 13] {
        map[k].1.push("shared-ligature".to_string());
    }
    for k in [2usize, 3] {
        map[k].1.push("shared-accent".to_string());
    }

    let dict = LookupDictionary::build(&map).unwrap();
    assert!(dict.uses_direct_mode());
    let decoded = LookupDictionary::from_bytes(&dict.to_bytes()).unwrap();

    for (key, values) in &map {
        for value in values {
            let owners = decoded.query_all(value).unwrap();
            assert!(owners.contains(&key.as_str()), "{value} must list {key}");
        }
    }
    assert_eq!(
        decoded.query_all("shared-ligature"),
        Some(vec!["font-00", "font-07", "font-13"])
    );
    assert_eq!(decoded.query_all("shared-accent"), Some(vec!["font-02", "font-03"]));
    assert_eq!(decoded.query("glyph-05-3"), Some("font-05"));
}

#[test]
fn test_validation_off_never_rejects() {
    // With validation disabled every probe resolves to some key, which
    // is the documented trade-off of the bare MPHF.
    let options = BuildOptions::default().with_validation(ValidationMode::None);
    let dict = LookupDictionary::build_with_options(&cities(), options).unwrap();
    assert!(dict.query("Beijing").is_some());
    assert!(dict.query("definitely-not-a-city").is_some());
}
