use super::*;

fn ramp(width: usize, height: usize, depth: usize) -> Tensor3 {
    let data = (0..width * height * depth).map(|i| i as f64).collect();
    Tensor3::from_data(width, height, depth, data)
}

#[test]
fn test_channel_minor_layout() {
    let t = ramp(3, 2, 2);
    // index = depth * (y * width + x) + z
    assert_eq!(t.get(0, 0, 1), 1.0);
    assert_eq!(t.get(1, 0, 0), 2.0);
    assert_eq!(t.get(0, 1, 0), 6.0);
    assert_eq!(t.get(2, 1, 1), 11.0);
}

#[test]
fn test_set_and_fill() {
    let mut t = Tensor3::new(2, 2, 1);
    t.set(1, 1, 0, 4.5);
    assert_eq!(t.data(), &[0.0, 0.0, 0.0, 4.5]);
    t.fill(1.0);
    assert!(t.data().iter().all(|&v| v == 1.0));
}

#[test]
#[should_panic(expected = "needs 8 values")]
fn test_from_data_length_mismatch() {
    let _ = Tensor3::from_data(2, 2, 2, vec![0.0; 7]);
}

#[test]
#[should_panic(expected = "out of bounds")]
fn test_get_past_width_panics() {
    let mut t = Tensor3::new(2, 2, 1);
    t.set(0, 1, 0, 7.0);
    let _ = t.get(2, 0, 0);
}

#[test]
#[should_panic(expected = "out of bounds")]
fn test_set_past_height_panics() {
    let mut t = Tensor3::new(2, 2, 1);
    t.set(0, 2, 0, 1.0);
}

#[test]
fn test_crop() {
    let t = ramp(4, 3, 1);
    let mut dest = Tensor3::new(2, 2, 1);
    t.crop(1, 1, &mut dest);
    assert_eq!(dest.data(), &[5.0, 6.0, 9.0, 10.0]);
}

#[test]
fn test_crop_borrowed_view() {
    let backing = vec![1.0, 2.0, 3.0, 4.0];
    let view = Tensor3::from_data(2, 2, 1, backing.as_slice());
    let mut dest = Tensor3::new(1, 2, 1);
    view.crop(1, 0, &mut dest);
    assert_eq!(dest.data(), &[2.0, 4.0]);
}

#[test]
#[should_panic(expected = "exceeds")]
fn test_crop_out_of_bounds() {
    let t = ramp(3, 3, 1);
    let mut dest = Tensor3::new(2, 2, 1);
    t.crop(2, 0, &mut dest);
}

#[test]
fn test_mul_add_positive_offset() {
    let mut t = Tensor3::new(3, 3, 1);
    let src = Tensor3::from_data(2, 2, 1, vec![1.0, 2.0, 3.0, 4.0]);
    t.mul_add(1, 1, &src, 2.0);
    assert_eq!(
        t.data(),
        &[0.0, 0.0, 0.0, 0.0, 2.0, 4.0, 0.0, 6.0, 8.0]
    );
}

#[test]
fn test_mul_add_clips_to_overlap() {
    let mut t = Tensor3::new(2, 2, 1);
    let src = Tensor3::from_data(2, 2, 1, vec![1.0, 2.0, 3.0, 4.0]);
    t.mul_add(1, -1, &src, 1.0);
    // Only src(0,1) = 3 lands inside, at t(1,0).
    assert_eq!(t.data(), &[0.0, 3.0, 0.0, 0.0]);

    let mut untouched = Tensor3::new(2, 2, 1);
    untouched.mul_add(5, 0, &src, 1.0);
    assert!(untouched.data().iter().all(|&v| v == 0.0));
}

// Gathering a window with a negative-offset mul_add must match crop + axpy
// for every window position a strided convolution can produce.
#[test]
fn test_negative_offset_mul_add_matches_crop() {
    let input = Tensor3::from_data(
        7,
        6,
        2,
        (0..84).map(|i| ((i * 37) % 11) as f64 - 5.0).collect::<Vec<_>>(),
    );
    for &(fw, fh) in &[(1, 1), (2, 3), (3, 3), (3, 2), (7, 6)] {
        for stride in 1..=3 {
            let out_w = (input.width() - fw) / stride + 1;
            let out_h = (input.height() - fh) / stride + 1;
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let (x, y) = (ox * stride, oy * stride);
                    let mut via_crop = Tensor3::new(fw, fh, 2);
                    let mut cropped = Tensor3::new(fw, fh, 2);
                    input.crop(x, y, &mut cropped);
                    ops::axpy(via_crop.data_mut(), 0.5, cropped.data());

                    let mut via_offset = Tensor3::new(fw, fh, 2);
                    via_offset.mul_add(-(x as isize), -(y as isize), &input, 0.5);

                    assert_eq!(via_crop, via_offset, "filter {}x{}, stride {}, at ({}, {})", fw, fh, stride, x, y);
                }
            }
        }
    }
}
