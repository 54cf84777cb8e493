use serde::{Deserialize, Serialize};
use schemars::JsonSchema;

const SQ_M_PER_HECTARE: f64 = 10_000.0;
const SQ_M_PER_SQ_KM: f64 = 1_000_000.0;
const SQ_M_PER_ACRE: f64 = 4_046.856_422_4;
const SQ_M_PER_SQ_MILE: f64 = 2_589_988.110_336;
const SQ_M_PER_SQ_FOOT: f64 = 0.092_903_04;

/// An area reported in the units survey operators commonly ask for
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AreaMeasurement {
    pub square_meters: f64,
    pub hectares: f64,
    pub square_kilometers: f64,
    pub acres: f64,
    pub square_miles: f64,
    pub square_feet: f64,
}

impl AreaMeasurement {
    pub fn from_square_meters(square_meters: f64) -> Self {
        Self {
            square_meters,
            hectares: square_meters / SQ_M_PER_HECTARE,
            square_kilometers: square_meters / SQ_M_PER_SQ_KM,
            acres: square_meters / SQ_M_PER_ACRE,
            square_miles: square_meters / SQ_M_PER_SQ_MILE,
            square_feet: square_meters / SQ_M_PER_SQ_FOOT,
        }
    }

    pub fn zero() -> Self {
        Self::from_square_meters(0.0)
    }
}

impl std::ops::Add for AreaMeasurement {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::from_square_meters(self.square_meters + other.square_meters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unit_conversions() {
        let area = AreaMeasurement::from_square_meters(1_000_000.0);
        assert_relative_eq!(area.hectares, 100.0);
        assert_relative_eq!(area.square_kilometers, 1.0);
        assert_relative_eq!(area.acres, 247.105, max_relative = 1e-5);
        assert_relative_eq!(area.square_miles, 0.386_102, max_relative = 1e-5);
        assert_relative_eq!(area.square_feet, 10_763_910.4, max_relative = 1e-6);
    }

    #[test]
    fn test_sum() {
        let total = AreaMeasurement::from_square_meters(400.0) + AreaMeasurement::from_square_meters(600.0);
        assert_eq!(total.square_meters, 1000.0);
        assert_eq!(AreaMeasurement::zero().acres, 0.0);
    }
}
