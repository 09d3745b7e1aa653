use std::cmp::Ordering;

fn secants(x: &[f64], y: &[f64]) -> Vec<f64> {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xw, yw)| {
            let dx = xw[1] - xw[0];
            if dx != 0.0 {
                (yw[1] - yw[0]) / dx
            } else {
                0.0
            }
        })
        .collect()
}

fn ratio_or_zero(num: f64, den: f64) -> f64 {
    if den != 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Derivative estimates at the knots `(x, y)`.
///
/// Interior points blend the two neighbouring secants weighted by the
/// opposite interval length (a local parabola through three points). The end
/// points use `2 * secant - neighbour`. With only two knots both derivatives
/// equal the single secant.
pub fn slopes(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return vec![f64::NAN; n];
    }
    let s = secants(&x[..n], &y[..n]);
    if n == 2 {
        return vec![s[0]; 2];
    }
    let dx: Vec<f64> = x[..n].windows(2).map(|w| w[1] - w[0]).collect();
    let mut yp = vec![f64::NAN; n];
    for i in 1..n - 1 {
        let denom = dx[i - 1] + dx[i];
        if denom.is_finite() && denom != 0.0 {
            yp[i] = (s[i - 1] * dx[i] + s[i] * dx[i - 1]) / denom;
        }
    }
    yp[0] = 2.0 * s[0] - yp[1];
    yp[n - 1] = 2.0 * s[n - 2] - yp[n - 2];
    yp
}

/// `x` must be sorted; queries outside the knots use the end segments.
pub fn interpolate(xi: &[f64], x: &[f64], y: &[f64], yp: Option<&[f64]>) -> Vec<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return vec![f64::NAN; xi.len()];
    }
    let (x, y) = (&x[..n], &y[..n]);
    let estimated;
    let yp = match yp {
        Some(given) if given.len() >= n => given,
        Some(_) => return vec![f64::NAN; xi.len()],
        None => {
            estimated = slopes(x, y);
            estimated.as_slice()
        }
    };
    let s = secants(x, y);
    let interior = &x[1..n - 1];

    xi.iter()
        .map(|&q| {
            let idx = interior.partition_point(|&k| k < q).min(n - 2);
            let (x0, x1) = (x[idx], x[idx + 1]);
            let slope = s[idx];
            let linear = y[idx] + slope * (q - x0);
            let dy1 = (yp[idx] - slope) * (q - x0);
            let dy2 = (yp[idx + 1] - slope) * (q - x1);
            let product = dy1 * dy2;
            let sign = if product.is_finite() {
                product.partial_cmp(&0.0).unwrap_or(Ordering::Equal)
            } else {
                Ordering::Equal
            };
            let blend = match sign {
                // corrections pull the same way
                Ordering::Greater => ratio_or_zero(1.0, dy1 + dy2),
                // corrections disagree: weight toward the nearer knot
                Ordering::Less => ratio_or_zero(2.0 * q - x0 - x1, (dy1 - dy2) * (x1 - x0)),
                Ordering::Equal => 0.0,
            };
            let yi = linear + product * blend;
            if yi.is_infinite() {
                f64::NAN
            } else {
                yi
            }
        })
        .collect()
}
