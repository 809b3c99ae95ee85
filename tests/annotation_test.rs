use mrp::annotation::{passes_filter, Category, VariantAnnotation};
use mrp::model::{SigmaMType, VariantFilter};

fn annotation(consequence: &str, mpc: Option<f64>, pli: bool) -> VariantAnnotation {
    VariantAnnotation {
        category: Category::from_consequence(consequence),
        mpc,
        pli,
    }
}

fn assert_sigma(annotation: &VariantAnnotation, sigma_m_type: SigmaMType, expected: Option<f64>) {
    let sigma = annotation.sigma_m(sigma_m_type);
    match (sigma, expected) {
        (Some(sigma), Some(expected)) => assert!(
            (sigma - expected).abs() < 1e-12,
            "{:?} {} got {} expected {}",
            annotation,
            sigma_m_type,
            sigma,
            expected
        ),
        _ => assert_eq!(sigma, expected, "{:?} {}", annotation, sigma_m_type),
    }
}

#[test]
fn consequence_categories() {
    let cases = [
        ("stop_gained", Some(Category::Ptv)),
        ("frameshift_variant", Some(Category::Ptv)),
        ("missense_variant", Some(Category::Pav)),
        ("inframe_deletion", Some(Category::Pav)),
        ("synonymous_variant", Some(Category::Pcv)),
        ("intron_variant", Some(Category::Intron)),
        ("3_prime_UTR_variant", Some(Category::Utr)),
        ("intergenic_variant", Some(Category::Others)),
        ("unclassified_variant", None),
    ];
    for (consequence, expected) in cases {
        assert_eq!(Category::from_consequence(consequence), expected, "{}", consequence);
    }
}

#[test]
fn sigma_m_by_category() {
    let cases = [
        ("stop_gained", 0.2),
        ("missense_variant", 0.05),
        ("synonymous_variant", 0.03),
        ("intron_variant", 0.03),
        ("5_prime_UTR_variant", 0.03),
        ("upstream_gene_variant", 0.02),
    ];
    for (consequence, sigma) in cases {
        let annotation = annotation(consequence, None, false);
        assert_sigma(&annotation, SigmaMType::SigmaMVar, Some(sigma));
        assert_sigma(&annotation, SigmaMType::SigmaMMpcPli, Some(sigma));
        assert_sigma(&annotation, SigmaMType::SigmaM1, Some(1.0));
        assert_sigma(&annotation, SigmaMType::SigmaM005, Some(0.05));
    }
}

#[test]
fn sigma_m_with_mpc_and_pli() {
    // protein-truncating variant in a constrained gene
    let ptv_pli = annotation("stop_gained", None, true);
    assert!(ptv_pli.is_pli_ptv());
    assert_sigma(&ptv_pli, SigmaMType::SigmaMMpcPli, Some(0.4));
    assert_sigma(&ptv_pli, SigmaMType::SigmaMVar, Some(0.2));

    // damaging missense variant
    let pav = annotation("missense_variant", Some(2.5), false);
    assert!(pav.is_damaging_pav());
    assert_sigma(&pav, SigmaMType::SigmaMMpcPli, Some(0.125));
    assert_sigma(&pav, SigmaMType::SigmaMVar, Some(0.05));

    let pav = annotation("missense_variant", Some(1.0), false);
    assert!(pav.is_damaging_pav());
    assert_sigma(&pav, SigmaMType::SigmaMMpcPli, Some(0.05));

    for mpc in [Some(0.5), None] {
        let pav = annotation("missense_variant", mpc, true);
        assert!(!pav.is_damaging_pav());
        assert!(!pav.is_pli_ptv());
        assert_sigma(&pav, SigmaMType::SigmaMMpcPli, Some(0.05));
    }

    // a high MPC does not scale other categories
    let pcv = annotation("synonymous_variant", Some(3.0), true);
    assert!(!pcv.is_damaging_pav());
    assert_sigma(&pcv, SigmaMType::SigmaMMpcPli, Some(0.03));
}

#[test]
fn sigma_m_of_unclassified_consequence() {
    let unknown = annotation("unclassified_variant", Some(2.0), true);
    assert_sigma(&unknown, SigmaMType::SigmaMVar, None);
    assert_sigma(&unknown, SigmaMType::SigmaMMpcPli, None);
    assert_sigma(&unknown, SigmaMType::SigmaM1, Some(1.0));
    assert_sigma(&unknown, SigmaMType::SigmaM005, Some(0.05));
}

#[test]
fn variant_filter_membership() {
    use VariantFilter::{All, Pav, Pcv, Ptv};

    let categories = [
        Some(Category::Ptv),
        Some(Category::Pav),
        Some(Category::Pcv),
        Some(Category::Intron),
        Some(Category::Utr),
        Some(Category::Others),
        None,
    ];
    // expected membership per category, in the order above
    let cases = [
        (All, [true, true, true, true, true, true, true]),
        (Ptv, [true, false, false, false, false, false, false]),
        (Pav, [true, true, false, false, false, false, false]),
        (Pcv, [true, true, true, false, false, false, false]),
    ];
    for (filter, expected) in cases {
        for (category, expected) in categories.iter().zip(expected) {
            assert_eq!(
                passes_filter(filter, *category),
                expected,
                "{} {:?}",
                filter,
                category
            );
        }
    }
}
