/// Binomial coefficient computed as a running product, so it stays finite
/// for the depths seen at a single site.
pub fn n_choose_k(n: u64, k: u64) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    (1..=k).fold(1.0, |product, i| product * (n - k + i) as f64 / i as f64)
}

/// Probability of exactly `k` successes in `n` trials with success rate `p`.
pub fn binom_pdf(k: u64, n: u64, p: f64) -> f64 {
    if k > n {
        return 0.0;
    }
    n_choose_k(n, k) * p.powf(k as f64) * (1.0 - p).powf((n - k) as f64)
}

/// Phred-scaled quality of an error probability, `-10 log10(p)`.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(phred(0.001), 30.0);
/// ```
pub fn phred(error_probability: f64) -> f64 {
    -10.0 * error_probability.log10()
}
