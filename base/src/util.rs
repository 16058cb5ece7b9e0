pub mod cli;
pub mod fs;
pub mod test;

#[macro_export]
macro_rules! assert_eq_f32 {
    ($left:expr, $right:expr) => {
        assert!(
            ($left as f32 - $right as f32).abs() <= f32::EPSILON * 10.0,
            "assertion failed: `{} ~= {}`",
            $left,
            $right
        )
    };
}
