/// Expand a 5-year explicit growth forecast into a 10-year path.
///
/// Years 1-5 copy the forecast verbatim. Years 6-10 fade linearly from the
/// year-5 rate toward the terminal rate, landing on it exactly at year 10,
/// so the path hands off to the perpetuity without a discontinuous jump.
pub fn bridge_growth_path(five_year_rates: [f64; 5], terminal_growth_rate: f64) -> Vec<f64> {
    let mut path = five_year_rates.to_vec();
    let last_explicit_rate = five_year_rates[4];
    let fade_step = (last_explicit_rate - terminal_growth_rate) / 5.0;

    for i in 1..=5 {
        path.push(last_explicit_rate - fade_step * i as f64);
    }

    path
}
