//! Organization-level aggregates over scored employees.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scoring::{RiskLabel, ScoredEmployee};

pub const UNKNOWN_DEPARTMENT: &str = "Unknown";
pub const TENURE_BIN_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentRisk {
    pub department: String,
    pub employees: usize,
    pub mean_risk: f64,
    pub mean_engagement: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RiskDistribution {
    pub high_risk: usize,
    pub low_risk: usize,
}

/// A right-inclusive tenure interval `(lower, upper]`; the first bin also holds `lower`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenureBin {
    pub lower: f64,
    pub upper: f64,
    pub employees: usize,
    pub mean_risk: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationSummary {
    pub total_employees: usize,
    pub at_risk_employees: usize,
    pub average_risk: Option<f64>,
    pub average_engagement: Option<f64>,
    pub average_tenure: Option<f64>,
    /// Sorted by mean risk, highest first.
    pub departments: Vec<DepartmentRisk>,
    pub risk_distribution: RiskDistribution,
    /// Only bins that hold at least one employee.
    pub tenure_impact: Vec<TenureBin>,
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    risk_sum: f64,
    engagement_sum: f64,
    engagement_count: usize,
}

impl Accumulator {
    fn push(&mut self, row: &ScoredEmployee) {
        self.count += 1;
        self.risk_sum += row.attrition_probability;
        if let Some(engagement) = row.record.engagement_score {
            self.engagement_sum += engagement;
            self.engagement_count += 1;
        }
    }

    fn mean_risk(&self) -> f64 {
        self.risk_sum / self.count as f64
    }

    fn mean_engagement(&self) -> Option<f64> {
        mean(self.engagement_sum, self.engagement_count)
    }
}

pub fn summarize(rows: &[ScoredEmployee]) -> OrganizationSummary {
    let mut overall = Accumulator::default();
    let mut by_department: BTreeMap<&str, Accumulator> = BTreeMap::new();
    let mut distribution = RiskDistribution::default();
    let mut tenure_sum = 0.0;
    let mut tenure_count = 0usize;

    for row in rows {
        overall.push(row);
        let department = row
            .record
            .department
            .as_deref()
            .unwrap_or(UNKNOWN_DEPARTMENT);
        by_department.entry(department).or_default().push(row);

        match row.risk_label {
            RiskLabel::High => distribution.high_risk += 1,
            RiskLabel::Low => distribution.low_risk += 1,
        }
        if let Some(tenure) = row.record.tenure {
            tenure_sum += tenure;
            tenure_count += 1;
        }
    }

    let mut departments: Vec<DepartmentRisk> = by_department
        .into_iter()
        .map(|(department, acc)| DepartmentRisk {
            department: department.to_string(),
            employees: acc.count,
            mean_risk: acc.mean_risk(),
            mean_engagement: acc.mean_engagement(),
        })
        .collect();
    // Stable sort keeps alphabetical order among equal risks.
    departments.sort_by(|a, b| b.mean_risk.total_cmp(&a.mean_risk));

    OrganizationSummary {
        total_employees: rows.len(),
        at_risk_employees: distribution.high_risk,
        average_risk: mean(overall.risk_sum, overall.count),
        average_engagement: overall.mean_engagement(),
        average_tenure: mean(tenure_sum, tenure_count),
        departments,
        risk_distribution: distribution,
        tenure_impact: tenure_bins(rows),
    }
}

fn tenure_bins(rows: &[ScoredEmployee]) -> Vec<TenureBin> {
    let points: Vec<(f64, f64)> = rows
        .iter()
        .filter_map(|row| row.record.tenure.map(|t| (t, row.attrition_probability)))
        .collect();
    let Some(min) = points.iter().map(|(t, _)| *t).min_by(f64::total_cmp) else {
        return Vec::new();
    };
    let max = points
        .iter()
        .map(|(t, _)| *t)
        .max_by(f64::total_cmp)
        .unwrap_or(min);

    if max == min {
        let risk_sum: f64 = points.iter().map(|(_, p)| p).sum();
        return vec![TenureBin {
            lower: min,
            upper: max,
            employees: points.len(),
            mean_risk: risk_sum / points.len() as f64,
        }];
    }

    let width = (max - min) / TENURE_BIN_COUNT as f64;
    let mut sums = [0.0_f64; TENURE_BIN_COUNT];
    let mut counts = [0usize; TENURE_BIN_COUNT];
    for (tenure, probability) in &points {
        let position = ((tenure - min) / width).ceil() as usize;
        let idx = position.saturating_sub(1).min(TENURE_BIN_COUNT - 1);
        sums[idx] += probability;
        counts[idx] += 1;
    }

    (0..TENURE_BIN_COUNT)
        .filter(|idx| counts[*idx] > 0)
        .map(|idx| TenureBin {
            lower: min + width * idx as f64,
            upper: if idx + 1 == TENURE_BIN_COUNT {
                max
            } else {
                min + width * (idx + 1) as f64
            },
            employees: counts[idx],
            mean_risk: sums[idx] / counts[idx] as f64,
        })
        .collect()
}

fn mean(sum: f64, count: usize) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EmployeeRecord;

    fn scored(
        department: Option<&str>,
        tenure: Option<f64>,
        engagement: Option<f64>,
        probability: f64,
    ) -> ScoredEmployee {
        ScoredEmployee::new(
            "0".to_string(),
            EmployeeRecord {
                department: department.map(str::to_string),
                tenure,
                engagement_score: engagement,
                ..EmployeeRecord::default()
            },
            probability,
        )
    }

    #[test]
    fn empty_input_has_no_averages() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_employees, 0);
        assert_eq!(summary.average_risk, None);
        assert!(summary.departments.is_empty());
        assert!(summary.tenure_impact.is_empty());
    }

    #[test]
    fn aggregates_and_orders_departments_by_risk() {
        let rows = vec![
            scored(Some("Sales"), Some(1.0), Some(2.0), 0.9),
            scored(Some("Sales"), Some(2.0), Some(4.0), 0.7),
            scored(Some("HR"), Some(3.0), None, 0.2),
            scored(None, None, Some(3.0), 0.5),
        ];
        let summary = summarize(&rows);

        assert_eq!(summary.total_employees, 4);
        assert_eq!(summary.at_risk_employees, 2);
        assert_eq!(
            summary.risk_distribution,
            RiskDistribution {
                high_risk: 2,
                low_risk: 2
            }
        );
        assert!((summary.average_risk.unwrap() - 0.575).abs() < 1e-12);
        assert!((summary.average_engagement.unwrap() - 3.0).abs() < 1e-12);
        assert!((summary.average_tenure.unwrap() - 2.0).abs() < 1e-12);

        let names: Vec<&str> = summary
            .departments
            .iter()
            .map(|d| d.department.as_str())
            .collect();
        assert_eq!(names, vec!["Sales", "Unknown", "HR"]);
        assert_eq!(summary.departments[0].employees, 2);
        assert!((summary.departments[0].mean_risk - 0.8).abs() < 1e-12);
        assert_eq!(summary.departments[2].mean_engagement, None);
    }

    #[test]
    fn tenure_bins_are_right_inclusive_and_skip_empty() {
        let rows = vec![
            scored(Some("HR"), Some(0.0), None, 0.1),
            scored(Some("HR"), Some(2.0), None, 0.3),
            scored(Some("HR"), Some(2.5), None, 0.5),
            scored(Some("HR"), Some(10.0), None, 0.9),
        ];
        let bins = summarize(&rows).tenure_impact;

        assert_eq!(bins.len(), 3);
        assert_eq!(bins[0].employees, 2);
        assert_eq!((bins[0].lower, bins[0].upper), (0.0, 2.0));
        assert!((bins[0].mean_risk - 0.2).abs() < 1e-12);
        assert_eq!(bins[1].employees, 1);
        assert_eq!((bins[1].lower, bins[1].upper), (2.0, 4.0));
        assert_eq!(bins[2].upper, 10.0);
        assert_eq!(bins[2].employees, 1);
    }

    #[test]
    fn constant_tenure_collapses_to_single_bin() {
        let rows = vec![
            scored(None, Some(4.0), None, 0.2),
            scored(None, Some(4.0), None, 0.4),
        ];
        let bins = summarize(&rows).tenure_impact;
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].employees, 2);
    }
}
