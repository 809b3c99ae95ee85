use crate::model::{SigmaMType, VariantFilter};

/// Functional category of a variant, derived from its most severe
/// consequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Ptv,
    Pav,
    Pcv,
    Intron,
    Utr,
    Others,
}

const PTV_CONSEQUENCES: &[&str] = &[
    "splice_acceptor_variant",
    "splice_donor_variant",
    "stop_lost",
    "stop_gained",
    "frameshift_variant",
    "transcript_ablation",
    "start_lost",
    "pLoF",
];

const PAV_CONSEQUENCES: &[&str] = &[
    "missense_variant",
    "splice_region_variant",
    "protein_altering_variant",
    "inframe_insertion",
    "inframe_deletion",
    "missense",
    "LC",
];

const PCV_CONSEQUENCES: &[&str] = &[
    "stop_retained_variant",
    "coding_sequence_variant",
    "incomplete_terminal_codon_variant",
    "synonymous_variant",
    "start_retained_variant",
];

const INTRON_CONSEQUENCES: &[&str] = &["intron_variant"];

const UTR_CONSEQUENCES: &[&str] = &["5_prime_UTR_variant", "3_prime_UTR_variant"];

/// Consequences of variants assumed to carry no effect. These are used to
/// estimate the correlation of errors between summary statistics.
pub const NULL_CONSEQUENCES: &[&str] = &[
    "regulatory_region_variant",
    "non_coding_transcript_variant",
    "mature_miRNA_variant",
    "NMD_transcript_variant",
    "intergenic_variant",
    "upstream_gene_variant",
    "downstream_gene_variant",
    "TF_binding_site_variant",
    "non_coding_transcript_exon_variant",
    "regulatory_region_ablation",
    "TFBS_ablation",
    "NA",
];

impl Category {
    pub fn from_consequence(consequence: &str) -> Option<Category> {
        let tables = [
            (Category::Ptv, PTV_CONSEQUENCES),
            (Category::Pav, PAV_CONSEQUENCES),
            (Category::Pcv, PCV_CONSEQUENCES),
            (Category::Intron, INTRON_CONSEQUENCES),
            (Category::Utr, UTR_CONSEQUENCES),
            (Category::Others, NULL_CONSEQUENCES),
        ];
        tables
            .iter()
            .find(|(_, consequences)| consequences.contains(&consequence))
            .map(|(category, _)| *category)
    }

    pub fn sigma_m_var(&self) -> f64 {
        match self {
            Category::Ptv => 0.2,
            Category::Pav => 0.05,
            Category::Pcv | Category::Intron | Category::Utr => 0.03,
            Category::Others => 0.02,
        }
    }
}

pub fn is_null_consequence(consequence: &str) -> bool {
    NULL_CONSEQUENCES.contains(&consequence)
}

/// Whether a variant of the given category enters an analysis.
pub fn passes_filter(filter: VariantFilter, category: Option<Category>) -> bool {
    match filter {
        VariantFilter::All => true,
        VariantFilter::Ptv => matches!(category, Some(Category::Ptv)),
        VariantFilter::Pav => matches!(category, Some(Category::Ptv | Category::Pav)),
        VariantFilter::Pcv => matches!(
            category,
            Some(Category::Ptv | Category::Pav | Category::Pcv)
        ),
    }
}

/// The annotation fields a prior scale can depend on.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantAnnotation {
    pub category: Option<Category>,
    pub mpc: Option<f64>,
    pub pli: bool,
}

impl VariantAnnotation {
    pub fn is_pli_ptv(&self) -> bool {
        self.category == Some(Category::Ptv) && self.pli
    }

    pub fn is_damaging_pav(&self) -> bool {
        self.category == Some(Category::Pav) && self.mpc.is_some_and(|mpc| mpc >= 1.0)
    }

    /// Prior scale of this variant's effect. `None` when the scale depends
    /// on a consequence that is not in the category tables.
    pub fn sigma_m(&self, sigma_m_type: SigmaMType) -> Option<f64> {
        match sigma_m_type {
            SigmaMType::SigmaM1 => Some(1.0),
            SigmaMType::SigmaM005 => Some(0.05),
            SigmaMType::SigmaMVar => self.category.map(|c| c.sigma_m_var()),
            SigmaMType::SigmaMMpcPli => {
                let sigma = self.category?.sigma_m_var();
                if self.is_pli_ptv() {
                    Some(2.0 * sigma)
                } else if self.is_damaging_pav() {
                    self.mpc.map(|mpc| mpc * sigma)
                } else {
                    Some(sigma)
                }
            }
        }
    }
}
