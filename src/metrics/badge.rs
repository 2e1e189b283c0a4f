//! Fixed-layout SVG badges for coverage and test results.

/// Render a two-cell badge. Layout is constant so badge bytes only change
/// when the value text changes.
pub fn generate_badge(label: &str, value: &str, color: &str) -> String {
    format!(
        "<svg xmlns='http://www.w3.org/2000/svg' width='140' height='20'>\
         <rect rx='4' width='140' height='20' fill='#555'/>\
         <rect rx='4' x='70' width='70' height='20' fill='{color}'/>\
         <g fill='#fff' text-anchor='middle' font-family='Verdana' font-size='11'>\
         <text x='35' y='14'>{label}</text>\
         <text x='105' y='14'>{value}</text>\
         </g></svg>\n"
    )
}
