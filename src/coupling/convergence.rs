//! Measuring how much prices and demand changed between iterations.
use super::demand::DemandTable;
use super::prices::PriceTable;
use crate::units::Dimensionless;

/// The symmetric percentage deviation between two values.
///
/// Returns `None` unless `a + b` is positive, as the deviation would otherwise be undefined or
/// negative.
pub fn symmetric_deviation(a: f64, b: f64) -> Option<f64> {
    let sum = a + b;
    if sum <= 0.0 {
        return None;
    }

    Some((a - b).abs() / (0.5 * sum))
}

/// The mean symmetric deviation over pairs of values.
///
/// Pairs for which the deviation is undefined are skipped. If no pairs remain, the result is NaN.
fn mean_deviation<I: IntoIterator<Item = (f64, f64)>>(pairs: I) -> Dimensionless {
    let (sum, count) = pairs
        .into_iter()
        .filter_map(|(a, b)| symmetric_deviation(a, b))
        .fold((0.0, 0.0), |(sum, count), deviation| (sum + deviation, count + 1.0));

    Dimensionless(sum / count)
}

/// Compares successive price and demand tables
pub struct ConvergenceEvaluator {
    excluded_period: u32,
}

impl ConvergenceEvaluator {
    /// Create an evaluator which ignores the given (placeholder) period
    pub fn new(excluded_period: u32) -> Self {
        Self { excluded_period }
    }

    /// Mean deviation between prices present in both tables
    pub fn price_deviation(&self, new: &PriceTable, old: &PriceTable) -> Dimensionless {
        mean_deviation(
            new.iter()
                .filter(|(key, _)| key.period != self.excluded_period)
                .filter_map(|(key, value)| Some((value.value(), old.get(key)?.value()))),
        )
    }

    /// Mean deviation between demand values present in both tables
    pub fn demand_deviation(&self, new: &DemandTable, old: &DemandTable) -> Dimensionless {
        mean_deviation(
            new.iter()
                .filter(|(key, _)| key.period != self.excluded_period)
                .filter_map(|(key, entry)| Some((entry.value.value(), old.get(key)?.value.value()))),
        )
    }

    /// Evaluate both deviations.
    ///
    /// The demand deviation is only calculated when there is a previous demand table.
    pub fn evaluate(
        &self,
        price_new: &PriceTable,
        price_old: &PriceTable,
        demand_new: &DemandTable,
        demand_old: Option<&DemandTable>,
    ) -> (Dimensionless, Option<Dimensionless>) {
        (
            self.price_deviation(price_new, price_old),
            demand_old.map(|old| self.demand_deviation(demand_new, old)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{demand_entry, demand_key, price_key};
    use crate::units::MoneyPerFlow;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    #[case(1.0, 3.0)]
    #[case(0.5, 100.0)]
    #[case(7.0, 7.0)]
    #[case(1e-9, 2e-9)]
    fn test_symmetric_deviation_is_symmetric(#[case] a: f64, #[case] b: f64) {
        assert_eq!(symmetric_deviation(a, b), symmetric_deviation(b, a));
    }

    #[test]
    fn test_symmetric_deviation() {
        assert_eq!(symmetric_deviation(1.0, 3.0), Some(1.0));
        assert_eq!(symmetric_deviation(2.0, 2.0), Some(0.0));
        assert_eq!(symmetric_deviation(0.0, 0.0), None);
        assert_eq!(symmetric_deviation(3.0, -1.0), Some(4.0));
    }

    #[rstest]
    #[case(-3.0, 1.0)]
    #[case(-2.0, -2.0)]
    #[case(-1.0, 1.0)]
    fn test_symmetric_deviation_non_positive_sum(#[case] a: f64, #[case] b: f64) {
        assert_eq!(symmetric_deviation(a, b), None);
    }

    #[test]
    fn test_price_deviation_skips_negative_sum() {
        let new = [
            (price_key("R1", "gas", 2020), MoneyPerFlow(-3.0)),
            (price_key("R1", "gas", 2030), MoneyPerFlow(1.0)),
        ]
        .into_iter()
        .collect();
        let old = [
            (price_key("R1", "gas", 2020), MoneyPerFlow(1.0)),
            (price_key("R1", "gas", 2030), MoneyPerFlow(3.0)),
        ]
        .into_iter()
        .collect();

        // Only the 2030 pair counts
        let evaluator = ConvergenceEvaluator::new(2110);
        assert_approx_eq!(f64, evaluator.price_deviation(&new, &old).value(), 1.0);
    }

    #[test]
    fn test_price_deviation_inner_join() {
        let new = [
            (price_key("R1", "gas", 2020), MoneyPerFlow(1.0)),
            (price_key("R1", "gas", 2030), MoneyPerFlow(2.0)),
            (price_key("R2", "gas", 2020), MoneyPerFlow(50.0)),
        ]
        .into_iter()
        .collect();
        let old = [
            (price_key("R1", "gas", 2020), MoneyPerFlow(3.0)),
            (price_key("R1", "gas", 2030), MoneyPerFlow(2.0)),
            (price_key("R3", "gas", 2020), MoneyPerFlow(9.0)),
        ]
        .into_iter()
        .collect();

        // (1.0 + 0.0) / 2
        let evaluator = ConvergenceEvaluator::new(2110);
        assert_approx_eq!(f64, evaluator.price_deviation(&new, &old).value(), 0.5);
    }

    #[test]
    fn test_price_deviation_excludes_placeholder() {
        let new = [
            (price_key("R1", "gas", 2100), MoneyPerFlow(2.0)),
            (price_key("R1", "gas", 2110), MoneyPerFlow(100.0)),
        ]
        .into_iter()
        .collect();
        let old = [
            (price_key("R1", "gas", 2100), MoneyPerFlow(2.0)),
            (price_key("R1", "gas", 2110), MoneyPerFlow(1.0)),
        ]
        .into_iter()
        .collect();

        let evaluator = ConvergenceEvaluator::new(2110);
        assert_eq!(evaluator.price_deviation(&new, &old), Dimensionless(0.0));
    }

    #[test]
    fn test_deviation_no_pairs_is_nan() {
        let evaluator = ConvergenceEvaluator::new(2110);
        let zeros: PriceTable = [(price_key("R1", "gas", 2020), MoneyPerFlow(0.0))]
            .into_iter()
            .collect();
        assert!(evaluator.price_deviation(&zeros, &zeros).is_nan());
        assert!(
            evaluator
                .price_deviation(&PriceTable::default(), &PriceTable::default())
                .is_nan()
        );
    }

    #[test]
    fn test_evaluate_demand_only_with_previous() {
        let evaluator = ConvergenceEvaluator::new(2110);
        let demand: DemandTable = [(demand_key("R1", "heat", 2020), demand_entry(4.0))]
            .into_iter()
            .collect();
        let prices = PriceTable::default();

        let (_, demand_deviation) = evaluator.evaluate(&prices, &prices, &demand, None);
        assert!(demand_deviation.is_none());

        let old: DemandTable = [(demand_key("R1", "heat", 2020), demand_entry(2.0))]
            .into_iter()
            .collect();
        let (_, demand_deviation) = evaluator.evaluate(&prices, &prices, &demand, Some(&old));
        assert_approx_eq!(f64, demand_deviation.unwrap().value(), 2.0 / 3.0);
    }
}
